//! A minimal writer for the ninja file syntax.

use std::fmt::Write as _;

/// Escape a path for use in a build statement.
pub fn escape_path(path: &str) -> String {
  path.replace('$', "$$").replace(' ', "$ ").replace(':', "$:")
}

/// Escape literal text for use as a variable value.
pub fn escape(text: &str) -> String {
  text.replace('$', "$$")
}

#[derive(Debug, Default)]
pub struct NinjaWriter {
  out: String,
}

impl NinjaWriter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn comment(&mut self, text: &str) {
    for line in text.lines() {
      let _ = writeln!(self.out, "# {line}");
    }
  }

  pub fn newline(&mut self) {
    self.out.push('\n');
  }

  pub fn variable(&mut self, key: &str, value: &str, indent: usize) {
    if value.is_empty() {
      return;
    }
    let _ = writeln!(self.out, "{}{key} = {value}", "  ".repeat(indent));
  }

  pub fn rule(&mut self, name: &str, command: &str, description: Option<&str>, depfile: Option<&str>) {
    let _ = writeln!(self.out, "rule {name}");
    self.variable("command", command, 1);
    if let Some(description) = description {
      self.variable("description", description, 1);
    }
    if let Some(depfile) = depfile {
      self.variable("depfile", depfile, 1);
      self.variable("deps", "gcc", 1);
    }
  }

  /// Emit a build statement. Paths are escaped here; variable values must
  /// already be escaped.
  pub fn build<S: AsRef<str>>(&mut self, outputs: &[S], rule: &str, inputs: &[S], variables: &[(&str, String)]) {
    let outputs: Vec<_> = outputs.iter().map(|o| escape_path(o.as_ref())).collect();
    let mut line = format!("build {}: {rule}", outputs.join(" "));
    for input in inputs {
      line.push(' ');
      line.push_str(&escape_path(input.as_ref()));
    }
    let _ = writeln!(self.out, "{line}");
    for (key, value) in variables {
      self.variable(key, value, 1);
    }
  }

  pub fn default_targets(&mut self, targets: &[String]) {
    let targets: Vec<_> = targets.iter().map(|t| escape_path(t)).collect();
    let _ = writeln!(self.out, "default {}", targets.join(" "));
  }

  pub fn finish(self) -> String {
    self.out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn escapes_paths() {
    assert_eq!(escape_path("my dir/a:b$c.o"), "my$ dir/a$:b$$c.o");
    assert_eq!(escape("-DX=$Y"), "-DX=$$Y");
  }

  #[test]
  fn rule_with_depfile() {
    let mut w = NinjaWriter::new();
    w.rule("cc", "gcc -MMD -MF $out.d -c $in -o $out", None, Some("$out.d"));
    assert_eq!(
      w.finish(),
      "rule cc\n  command = gcc -MMD -MF $out.d -c $in -o $out\n  depfile = $out.d\n  deps = gcc\n"
    );
  }

  #[test]
  fn build_statement_with_variables() {
    let mut w = NinjaWriter::new();
    w.build(&["build/a b.o"], "cc", &["src/a b.c"], &[("cflags", "-Iinclude".to_string())]);
    assert_eq!(w.finish(), "build build/a$ b.o: cc src/a$ b.c\n  cflags = -Iinclude\n");
  }

  #[test]
  fn empty_variables_are_skipped() {
    let mut w = NinjaWriter::new();
    w.comment("two\nlines");
    w.variable("cflags", "", 0);
    w.newline();
    assert_eq!(w.finish(), "# two\n# lines\n\n");
  }
}

//! Template content for `clyde init`.
//!
//! Placeholders: `{name}`, `{type}`, `{guard}` and `{author}`, where
//! `{author}` expands to zero or more complete YAML lines.

pub const CONFIG_YAML_TEMPLATE: &str = "\
name: {name}
version: 0.0.0
type: {type}
{author}cflags:
  gcc: -std=c99
  clang: -std=c99
# requires:
#   log:
#     version: '>=1.0,<2.0'
# variants:
#   - test:
#       when: {variant: test}
";

pub const LIBRARY_HEADER_TEMPLATE: &str = "\
#ifndef {guard}
#define {guard}

int {name}_version(void);

#endif
";

pub const LIBRARY_SOURCE_TEMPLATE: &str = "\
#include <{name}/{name}.h>

int {name}_version(void)
{
  return 0;
}
";

pub const APPLICATION_SOURCE_TEMPLATE: &str = "\
#include <stdio.h>

int main(void)
{
  printf(\"hello from {name}\\n\");
  return 0;
}
";

pub const GITIGNORE_TEMPLATE: &str = "\
/build/
/build.ninja
/.ninja_*
";

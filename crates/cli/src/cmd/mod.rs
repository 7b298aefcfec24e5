mod build;
mod clean;
mod fetch;
mod flush;
mod generate;
mod init;
mod run;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use fetch::cmd_fetch;
pub use flush::cmd_flush;
pub use generate::cmd_generate;
pub use init::cmd_init;
pub use run::{cmd_run, cmd_test};

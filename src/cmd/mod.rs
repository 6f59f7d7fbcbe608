//! CLI command implementations.
//!
//! | Module    | Commands handled          |
//! |-----------|---------------------------|
//! | `seed`    | `Seed`                    |
//! | `run`     | `Run`                     |
//! | `status`  | `Status`                  |
//! | `menu`    | `Menu`                    |
//! | `config`  | `Config`                  |

pub mod config;
pub mod menu;
pub mod run;
pub mod seed;
pub mod status;

pub use config::cmd_config;
pub use menu::cmd_menu;
pub use run::{RunOptions, cmd_run};
pub use seed::cmd_seed;
pub use status::cmd_status;

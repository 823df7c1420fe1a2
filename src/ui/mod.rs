//! Terminal output for the CLI
//!
//! Spinners and colored steps in an interactive terminal, plain
//! `[OK]`/`[WARN]` lines in CI and when output is piped.
//!
//! # Example
//!
//! ```rust,ignore
//! use wheelvend::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Building numpy==1.15.0...");
//! // ... wait for the build ...
//! spinner.stop("Build ready");
//!
//! ui::key_value(&ctx, "Location", "file:///srv/store/builds/.../");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{key_value, remark, section, step_error_detail, step_ok, step_warn_hint};
pub use progress::TaskSpinner;

//! Vend command - serve or build wheels for a request

use crate::audit::AuditLog;
use crate::cli::args::VendArgs;
use crate::cli::commands::{open_cache, store_root};
use crate::config::{Config, ConfigManager};
use crate::dispatch::{DispatchSettings, Dispatcher, VendResponse};
use crate::error::VendResult;
use crate::orchestration::create_provisioner;
use crate::request::VendRequest;
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;
use std::process::ExitCode;

/// Execute the vend command. Exits non-zero only on an error response.
///
/// `config_path` is the file `config` came from; local workers load it too.
pub async fn execute(args: VendArgs, config: &Config, config_path: &Path) -> VendResult<ExitCode> {
    let ctx = UiContext::detect();
    let request = VendRequest::new(args.runtime, args.requirements)
        .with_extras(args.extras)
        .with_minimal(args.minimal);

    let root = store_root(config);
    let coordinator = open_cache(config).await?;
    let provisioner = create_provisioner(
        config,
        &root,
        config_path,
        Some(ConfigManager::state_dir().join("workers")),
    )?;
    let dispatcher = Dispatcher::new(
        coordinator,
        provisioner,
        DispatchSettings::from_config(config, Some(root)),
    )
    .with_audit(AuditLog::new(config));

    let mut spinner = TaskSpinner::new(&ctx);
    if !args.json {
        spinner.start(&format!("Vending {}", request.requirements.join(" ")));
    }

    let response = dispatcher.vend(&request).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        render(&ctx, &mut spinner, &response);
    }

    Ok(if response.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn render(ctx: &UiContext, spinner: &mut TaskSpinner, response: &VendResponse) {
    match response {
        VendResponse::Ready(set) => {
            spinner.stop("Wheels ready");
            ui::key_value(ctx, "Location", &set.artifact_location);
            ui::section(ctx, "Requirements");
            for req in &set.requirements {
                ui::step_ok(ctx, &format!("{}=={}", req.name, req.version));
            }
        }
        VendResponse::Building(progress) => {
            spinner.stop_warn("Build still in progress");
            ui::key_value(ctx, "Fingerprint", &progress.fingerprint);
            ui::remark(
                ctx,
                &format!(
                    "Run the same command again in {}s to pick up the result",
                    progress.retry_after_secs
                ),
            );
        }
        VendResponse::Error(body) => {
            spinner.stop_error(&body.message);
            if let Some(ref diagnostic) = body.diagnostic {
                ui::section(ctx, "Build output");
                for line in diagnostic.lines() {
                    ui::remark(ctx, line);
                }
            }
            if let Some(ref hint) = body.hint {
                ui::step_warn_hint(ctx, &body.error, hint);
            }
        }
    }
}

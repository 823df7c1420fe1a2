//! Version command - report the orchestrator build

use crate::cli::args::VersionArgs;
use crate::dispatch::Dispatcher;
use crate::error::VendResult;

/// Execute the version command
pub async fn execute(args: VersionArgs) -> VendResult<()> {
    let info = Dispatcher::version();
    if args.json {
        println!("{}", serde_json::to_string(&info)?);
    } else {
        println!("wheelvend {}", info.version);
    }
    Ok(())
}

//! Fingerprint command - print the cache key of a request

use crate::cache::fingerprint;
use crate::cli::args::FingerprintArgs;
use crate::error::VendResult;
use crate::request::VendRequest;

/// Execute the fingerprint command
pub async fn execute(args: FingerprintArgs) -> VendResult<()> {
    let build = VendRequest::new(args.runtime, args.requirements)
        .with_extras(args.extras)
        .validate()?;
    println!("{}", fingerprint(&build));
    Ok(())
}

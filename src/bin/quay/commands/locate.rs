//! `quay locate` command
//!
//! Runs the search half of an install: existing installs are matched and
//! verified, nothing is fetched or built.

use std::sync::Arc;

use anyhow::Result;

use quay::builder::detect_toolchain;
use quay::core::InstallPrefix;
use quay::ops::InstallSession;
use quay::sources::SourceFetcher;
use quay::util::{CommandRunner, SystemRunner};

use super::{package_names, CommandContext};
use crate::cli::{GlobalArgs, LocateArgs};

pub fn execute(args: LocateArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = CommandContext::new(global)?;

    let work_dir = ctx.work_dir(None);
    let options = ctx
        .install_options(work_dir.clone(), &args.search)
        .with_search_only(true);

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let prefix = InstallPrefix::new(ctx.prefix(args.prefix.as_deref()));
    let toolchain = detect_toolchain(&ctx.config.toolchain);
    let fetcher = SourceFetcher::new(work_dir.join("src")).offline(true);

    let progress = ctx.shell.spinner("searching for existing installs");
    let session = InstallSession::new(
        &ctx.book,
        toolchain,
        prefix,
        runner,
        Box::new(fetcher),
        options,
    )
    .with_matcher(ctx.matcher())
    .with_events(ctx.events(progress.clone()));

    ctx.cancel_on_interrupt(session.cancel_token());
    let result = session.run(&package_names(&args.packages));
    progress.finish_and_clear();

    let report = result.map_err(|e| ctx.fail(e))?;
    ctx.finish(&report)
}

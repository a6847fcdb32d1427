//! `quay install` command

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use quay::builder::detect_toolchain;
use quay::core::InstallPrefix;
use quay::ops::InstallSession;
use quay::sources::SourceFetcher;
use quay::util::{CommandRunner, SystemRunner};

use super::{package_names, CommandContext};
use crate::cli::{GlobalArgs, InstallArgs};

pub fn execute(args: InstallArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = CommandContext::new(global)?;

    let prefix_dir = ctx.prefix(args.prefix.as_deref());
    let work_dir = ctx.work_dir(args.work_dir.as_deref());

    // Flags override config
    let mut options = ctx.install_options(work_dir.clone(), &args.search);
    if let Some(jobs) = args.jobs {
        options = options.with_jobs(jobs);
    }
    if let Some(secs) = args.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let mut prefix = InstallPrefix::new(&prefix_dir);
    if let Some(program) = args
        .install_sudo
        .or_else(|| ctx.config.install.install_sudo.clone())
    {
        prefix = prefix.with_privileged(program, runner.clone());
    }

    let toolchain = detect_toolchain(&ctx.config.toolchain);
    let fetcher = SourceFetcher::new(work_dir.join("src")).offline(args.offline);
    let roots = package_names(&args.packages);

    tracing::debug!(
        "prefix {}, work dir {}, {} job(s)",
        prefix_dir.display(),
        work_dir.display(),
        options.jobs
    );

    let progress = ctx.shell.spinner(format!("installing {}", args.packages.join(", ")));
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
    let result = session.run(&roots);
    progress.finish_and_clear();

    let report = result.map_err(|e| ctx.fail(e))?;
    ctx.finish(&report)
}

//! `quay plan` command

use anyhow::Result;
use serde_json::json;

use quay::builder::detect_toolchain;
use quay::core::PackageName;
use quay::ops::{plan_install, InstallOptions};
use quay::util::Status;

use super::{package_names, CommandContext};
use crate::cli::{GlobalArgs, PlanArgs};

pub fn execute(args: PlanArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = CommandContext::new(global)?;

    if args.list {
        list(&ctx);
        return Ok(());
    }

    let roots = if args.packages.is_empty() {
        ctx.book.names()
    } else {
        package_names(&args.packages)
    };

    let prefix = ctx.prefix(args.prefix.as_deref());
    let mut options = InstallOptions::from_config(&ctx.config, ctx.work_dir(None));
    if let Some(jobs) = args.jobs {
        options = options.with_jobs(jobs);
    }
    let toolchain = detect_toolchain(&ctx.config.toolchain);

    let plan = plan_install(&ctx.book, &roots, &toolchain, &prefix, &options)
        .map_err(|e| ctx.fail(e))?;

    if ctx.shell.is_json() {
        ctx.shell.json(&serde_json::to_value(&plan)?);
    } else {
        print!("{}", plan.render());
        ctx.shell.status(
            Status::Planned,
            format!("{} package(s) into {}", plan.packages.len(), prefix.display()),
        );
    }
    Ok(())
}

fn list(ctx: &CommandContext) {
    if ctx.shell.is_json() {
        let packages: Vec<_> = ctx
            .book
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "backend": p.backend.kind(),
                    "dependencies": p.dependencies,
                    "libraries": p.libraries,
                })
            })
            .collect();
        ctx.shell.json(&json!({ "packages": packages }));
        return;
    }

    for package in ctx.book.iter() {
        let deps: Vec<&str> = package.dependencies.iter().map(PackageName::as_str).collect();
        if deps.is_empty() {
            println!("{} ({})", package.name, package.backend.kind());
        } else {
            println!(
                "{} ({}) -> {}",
                package.name,
                package.backend.kind(),
                deps.join(", ")
            );
        }
    }
}

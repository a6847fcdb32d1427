//! GNU/Autotools backend.
//!
//! Self-sufficient packages get the usual `configure && make && make install`.
//! Packages that are not self-sufficient declare a [`Relocation`]: their
//! build drops an artifact under a name another component also uses, so the
//! install creates the target directories, copies headers, regenerates the
//! artifact and moves it to the package's own library name before anything
//! else can overwrite it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::builder::toolchain::Language;
use crate::core::Package;
use crate::discovery::{ResolvedLibrarySet, SearchLocation};

use super::backend::{render_variables, DependencyVariable};
use super::plan::{BuildStep, CommandLine, Phase, PlanContext};

/// Autotools recipe parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AutotoolsSpec {
    /// Extra `configure` arguments
    #[serde(default)]
    pub configure_args: Vec<String>,

    /// Variables filled from resolved dependencies, passed to `configure`
    #[serde(default)]
    pub dependency_variables: Vec<DependencyVariable>,

    /// Extra `make` arguments
    #[serde(default)]
    pub make_args: Vec<String>,

    /// Run `make` directly in the source tree
    #[serde(default)]
    pub skip_configure: bool,

    /// Post-build relocation for packages that are not self-sufficient
    #[serde(default)]
    pub relocate: Option<Relocation>,
}

/// Where a relocated package's artifact comes from and goes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Relocation {
    /// Artifact produced by the build, relative to the install prefix
    pub artifact: PathBuf,
    /// Final library name under `<prefix>/lib`
    pub library: String,
    /// Headers copied from the source tree into `<prefix>/include`
    #[serde(default)]
    pub headers: Vec<String>,
}

fn make_program(ctx: &PlanContext<'_>) -> PathBuf {
    ctx.toolchain
        .make
        .clone()
        .unwrap_or_else(|| PathBuf::from("make"))
}

/// Plan an Autotools build.
pub fn plan(spec: &AutotoolsSpec, ctx: &PlanContext<'_>) -> Vec<BuildStep> {
    match spec.relocate {
        Some(ref relocation) => plan_relocated(spec, relocation, ctx),
        None => plan_standard(spec, ctx),
    }
}

fn plan_standard(spec: &AutotoolsSpec, ctx: &PlanContext<'_>) -> Vec<BuildStep> {
    let make = make_program(ctx);
    let mut steps = Vec::new();

    let work_dir = if spec.skip_configure {
        ctx.source_dir.clone()
    } else {
        let mut configure = CommandLine::new(ctx.source_dir.join("configure"))
            .arg(format!("--prefix={}", ctx.prefix.display()))
            .cwd(&ctx.build_dir);

        for language in &ctx.package.languages {
            if let Some(compiler) = ctx.toolchain.compiler(*language) {
                configure = configure.arg(format!(
                    "{}={}",
                    language.env_var(),
                    compiler.display()
                ));
            }
        }
        for (name, value) in render_variables(&spec.dependency_variables, ctx.dependencies) {
            configure = configure.arg(format!("{}={}", name, value));
        }
        configure = configure.args(spec.configure_args.iter().cloned());

        steps.push(BuildStep::Run {
            phase: Phase::Configure,
            command: configure,
        });
        ctx.build_dir.clone()
    };

    steps.push(BuildStep::Run {
        phase: Phase::Compile,
        command: CommandLine::new(&make)
            .arg(format!("-j{}", ctx.jobs))
            .args(spec.make_args.iter().cloned())
            .cwd(&work_dir),
    });

    steps.push(BuildStep::Run {
        phase: Phase::Install,
        command: CommandLine::new(&make).arg("install").cwd(&work_dir),
    });

    steps
}

fn plan_relocated(
    spec: &AutotoolsSpec,
    relocation: &Relocation,
    ctx: &PlanContext<'_>,
) -> Vec<BuildStep> {
    let include_dir = ctx.prefix.join("include");
    let lib_dir = ctx.prefix.join("lib");
    let artifact = ctx.prefix.join(&relocation.artifact);

    let mut steps = vec![
        BuildStep::MakeDirs {
            dirs: vec![include_dir.clone(), lib_dir.clone()],
        },
        BuildStep::CopyFiles {
            files: relocation
                .headers
                .iter()
                .map(|h| (ctx.source_dir.join(h), include_dir.join(header_name(h))))
                .collect(),
        },
        BuildStep::RemoveStale {
            path: artifact.clone(),
        },
    ];

    let mut make = CommandLine::new(make_program(ctx)).cwd(&ctx.source_dir);
    if ctx.package.languages.contains(&Language::C) {
        if let Some(cc) = ctx.toolchain.compiler(Language::C) {
            make = make.env("CC", cc.display().to_string());
        }
    }
    for (name, value) in render_variables(&spec.dependency_variables, ctx.dependencies) {
        make = make.arg(format!("{}={}", name, value));
    }
    steps.push(BuildStep::Run {
        phase: Phase::Compile,
        command: make.args(spec.make_args.iter().cloned()),
    });

    steps.push(BuildStep::Relocate {
        from: artifact,
        to: lib_dir.join(&relocation.library),
    });

    steps
}

fn header_name(header: &str) -> &str {
    Path::new(header)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(header)
}

/// Library set of a relocated package, assumed usable once installed.
pub fn configure_library(spec: &AutotoolsSpec, prefix: &Path) -> Option<ResolvedLibrarySet> {
    let relocation = spec.relocate.as_ref()?;
    let lib_dir = prefix.join("lib");

    Some(ResolvedLibrarySet {
        hypothesis: 0,
        libraries: vec![lib_dir.join(&relocation.library)],
        location: SearchLocation::Directory {
            root: prefix.to_path_buf(),
            lib_dir,
        },
        include_dirs: vec![prefix.join("include")],
    })
}

/// Whether `package` installs through a relocation step.
pub fn is_relocated(package: &Package) -> bool {
    matches!(
        package.backend,
        super::backend::BackendSpec::Autotools(AutotoolsSpec {
            relocate: Some(_),
            ..
        })
    )
}

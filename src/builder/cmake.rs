//! CMake backend.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::builder::toolchain::Language;

use super::backend::{render_variables, DependencyVariable};
use super::plan::{BuildStep, CommandLine, Phase, PlanContext};

/// CMake recipe parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CMakeSpec {
    /// Minimum `cmake` version the project requires
    #[serde(default, alias = "min-cmake-version")]
    pub min_version: Option<semver::Version>,

    /// Extra `-D` arguments, passed verbatim
    #[serde(default)]
    pub args: Vec<String>,

    /// Variables filled from resolved dependencies
    #[serde(default)]
    pub dependency_variables: Vec<DependencyVariable>,

    /// Option switched `OFF` to skip the project's own test suite
    #[serde(default)]
    pub disable_tests: Option<String>,
}

fn compiler_variable(language: Language) -> &'static str {
    match language {
        Language::C => "CMAKE_C_COMPILER",
        Language::Cxx => "CMAKE_CXX_COMPILER",
        Language::Fortran => "CMAKE_Fortran_COMPILER",
    }
}

/// Plan a configure, build and install of a CMake project.
pub fn plan(spec: &CMakeSpec, ctx: &PlanContext<'_>) -> Vec<BuildStep> {
    let cmake = ctx
        .toolchain
        .cmake
        .clone()
        .unwrap_or_else(|| PathBuf::from("cmake"));

    let mut steps = vec![BuildStep::RequireTool {
        tool: "cmake".to_string(),
        program: ctx.toolchain.cmake.clone(),
        min_version: spec.min_version.clone(),
    }];

    let mut configure = CommandLine::new(&cmake)
        .arg("-S")
        .arg(ctx.source_dir.display().to_string())
        .arg("-B")
        .arg(ctx.build_dir.display().to_string())
        .arg(format!("-DCMAKE_INSTALL_PREFIX={}", ctx.prefix.display()))
        .arg("-DCMAKE_BUILD_TYPE=Release")
        .arg("-DCMAKE_POSITION_INDEPENDENT_CODE=ON");

    for language in &ctx.package.languages {
        if let Some(compiler) = ctx.toolchain.compiler(*language) {
            configure = configure.arg(format!(
                "-D{}={}",
                compiler_variable(*language),
                compiler.display()
            ));
        }
    }

    // One argument per variable; the list stays space-joined with no quoting.
    for (name, value) in render_variables(&spec.dependency_variables, ctx.dependencies) {
        configure = configure.arg(format!("-D{}={}", name, value));
    }

    configure = configure.args(spec.args.iter().cloned());

    if let Some(ref option) = spec.disable_tests {
        configure = configure.arg(format!("-D{}=OFF", option));
    }

    steps.push(BuildStep::Run {
        phase: Phase::Configure,
        command: configure,
    });

    steps.push(BuildStep::Run {
        phase: Phase::Compile,
        command: CommandLine::new(&cmake)
            .arg("--build")
            .arg(ctx.build_dir.display().to_string())
            .arg("--parallel")
            .arg(ctx.jobs.to_string()),
    });

    steps.push(BuildStep::Run {
        phase: Phase::Install,
        command: CommandLine::new(&cmake)
            .arg("--install")
            .arg(ctx.build_dir.display().to_string()),
    });

    steps
}

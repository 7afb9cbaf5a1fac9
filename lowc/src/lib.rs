pub mod ast;
pub mod error;
pub mod layout;
pub mod lower;
pub mod mono;
pub mod naming;
pub mod ops;
pub mod options;
pub mod printer;
pub mod synth;
pub mod target;

use tracing::{info, instrument};

pub use ast::Program;
pub use error::ExtractError;
pub use options::Options;
pub use target::TargetProgram;

/// One printed C file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub name: String,
    pub text: String,
    /// Other output files whose declarations this one refers to.
    pub depends_on: Vec<String>,
}

/// Result of a successful run.
///
/// `init_routine` names the synthesized routine that computes non-constant
/// globals. Nothing here calls it: the driver must arrange for it to run
/// before any of those globals is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub files: Vec<OutputFile>,
    pub init_routine: Option<String>,
}

impl Extraction {
    pub fn file(&self, name: &str) -> Option<&OutputFile> {
        self.files.iter().find(|file| file.name == name)
    }
}

/// Run every pass and print the result. Any error aborts the whole run.
#[instrument(skip_all)]
pub fn extract(program: &Program, options: &Options) -> Result<Extraction, ExtractError> {
    let lowered = lower_program(program, options)?;
    let files = lowered
        .files
        .iter()
        .map(|file| OutputFile {
            name: file.name.clone(),
            text: printer::print_file(file, options),
            depends_on: file.depends_on.clone(),
        })
        .collect::<Vec<_>>();
    info!(
        files = files.len(),
        init_routine = lowered.init_routine.as_deref().unwrap_or("-"),
        "extraction finished"
    );
    Ok(Extraction {
        files,
        init_routine: lowered.init_routine,
    })
}

/// Run every pass up to, but not including, printing.
pub fn lower_program(program: &Program, options: &Options) -> Result<TargetProgram, ExtractError> {
    options.validate()?;
    let mut resolver = naming::Resolver::new(options);
    naming::resolve_program(program, &mut resolver)?;
    let mono = mono::monomorphize(program, &mut resolver)?;
    let layouts = layout::compute_layouts(&mono, &mut resolver)?;
    lower::lower(&mono, &layouts, &mut resolver)
}

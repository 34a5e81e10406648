//! Seam over the external image tools used to inspect and rewrite the
//! functional series.
//!
//! The production implementation shells out to FSL; tests use an in-memory
//! double so nothing here needs an FSL install.
use crate::exec::{run_command, CommandRun};
use crate::util::path_to_str;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

/// Volume-level operations over 4D images addressed by path.
pub trait SignalTools {
    /// Number of volumes (timepoints) in `image`.
    fn volume_count(&self, image: &Path) -> Result<usize>;

    /// Copy volumes `first..first+count` (or through the end) into `output`.
    fn select_volumes(
        &self,
        input: &Path,
        output: &Path,
        first: usize,
        count: Option<usize>,
    ) -> Result<()>;

    /// Mean across time, one volume.
    fn temporal_mean(&self, input: &Path, output: &Path) -> Result<()>;

    /// `input - operand`, broadcasting a single-volume operand over time.
    fn subtract(&self, input: &Path, operand: &Path, output: &Path) -> Result<()>;

    /// `input + operand`, broadcasting a single-volume operand over time.
    fn add(&self, input: &Path, operand: &Path, output: &Path) -> Result<()>;

    /// Fresh zero-mean unit-variance noise shaped like `template`.
    fn gaussian_noise(&self, template: &Path, output: &Path) -> Result<()>;

    /// Concatenate `inputs` along time, in order.
    fn concat_time(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

/// FSL command-line implementation (`fslnvols`, `fslroi`, `fslmaths`, `fslmerge`).
#[derive(Debug, Clone, Default)]
pub struct FslTools {
    bin_dir: Option<PathBuf>,
}

impl FslTools {
    /// Resolve tools from `$FSLDIR/bin` when known, otherwise from `PATH`.
    pub fn new(fsl_dir: Option<&Path>) -> Self {
        Self {
            bin_dir: fsl_dir.map(|dir| dir.join("bin")),
        }
    }

    fn program(&self, name: &str) -> String {
        match &self.bin_dir {
            Some(dir) if dir.join(name).is_file() => dir.join(name).display().to_string(),
            _ => name.to_string(),
        }
    }

    fn run(&self, name: &str, args: &[&str]) -> Result<CommandRun> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.program(name));
        argv.extend(args.iter().map(|arg| arg.to_string()));
        let run = run_command(&argv, None, false)?;
        if !run.success() {
            let detail = run.stderr.trim().lines().next().unwrap_or_default().to_string();
            return Err(anyhow!(
                "{name} failed with exit code {:?}: {detail}",
                run.exit_code
            ));
        }
        Ok(run)
    }
}

impl SignalTools for FslTools {
    fn volume_count(&self, image: &Path) -> Result<usize> {
        let run = self.run("fslnvols", &[path_to_str(image)?])?;
        let text = run.stdout.trim();
        text.parse::<usize>()
            .with_context(|| format!("parse fslnvols output {text:?} for {}", image.display()))
    }

    fn select_volumes(
        &self,
        input: &Path,
        output: &Path,
        first: usize,
        count: Option<usize>,
    ) -> Result<()> {
        let first = first.to_string();
        let count = count.map_or_else(|| "-1".to_string(), |count| count.to_string());
        self.run(
            "fslroi",
            &[path_to_str(input)?, path_to_str(output)?, first.as_str(), count.as_str()],
        )?;
        Ok(())
    }

    fn temporal_mean(&self, input: &Path, output: &Path) -> Result<()> {
        self.run(
            "fslmaths",
            &[path_to_str(input)?, "-Tmean", path_to_str(output)?],
        )?;
        Ok(())
    }

    fn subtract(&self, input: &Path, operand: &Path, output: &Path) -> Result<()> {
        self.run(
            "fslmaths",
            &[
                path_to_str(input)?,
                "-sub",
                path_to_str(operand)?,
                path_to_str(output)?,
            ],
        )?;
        Ok(())
    }

    fn add(&self, input: &Path, operand: &Path, output: &Path) -> Result<()> {
        self.run(
            "fslmaths",
            &[
                path_to_str(input)?,
                "-add",
                path_to_str(operand)?,
                path_to_str(output)?,
            ],
        )?;
        Ok(())
    }

    fn gaussian_noise(&self, template: &Path, output: &Path) -> Result<()> {
        self.run(
            "fslmaths",
            &[
                path_to_str(template)?,
                "-mul",
                "0",
                "-randn",
                path_to_str(output)?,
            ],
        )?;
        Ok(())
    }

    fn concat_time(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let mut args = vec!["-t", path_to_str(output)?];
        for input in inputs {
            args.push(path_to_str(input)?);
        }
        self.run("fslmerge", &args)?;
        Ok(())
    }
}

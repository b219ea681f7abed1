pub mod parse_osm;
pub mod road_network;

use std::path::Path;
use log::{info, error, warn};

use crate::errors::Result;


/// One stage of the pipeline. A stage reads what it needs from the work directory or
/// its own configuration, transforms it in memory, and only writes during `load`.
/// Stages never share state except through files in the work directory.
pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;

    fn is_cached(&self, dir: &Path) -> Result<bool>;
    /// Removes whatever this stage writes, including leftovers of a failed load.
    fn clean(&self, dir: &Path) -> Result<()>;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()>;

    /// Runs the stage unless `is_cached` reports its output as still valid. The first
    /// failing phase is logged and returned. A failed `load` is followed by `clean`, so
    /// no half-written artifact is mistaken for output by the next stage or run.
    fn process(&mut self, dir: &Path) -> Result<()> {
        let etl_name = self.etl_name().to_string();
        info!(etl_name = etl_name.as_str(); "Starting ETL process");
        if self.is_cached(dir)? {
            info!(etl_name = etl_name.as_str(); "Using cached value");
        } else {
            info!(etl_name = etl_name.as_str(); "Extracting");
            let input = report(&etl_name, "extract", self.extract(dir))?;

            info!(etl_name = etl_name.as_str(); "Transforming");
            let output = report(&etl_name, "transform", self.transform(input))?;

            info!(etl_name = etl_name.as_str(); "Loading");
            if let Err(err) = report(&etl_name, "load", self.load(dir, output)) {
                if let Err(clean_err) = self.clean(dir) {
                    warn!(etl_name = etl_name.as_str(), err = clean_err.message.as_str(); "Could not clean up after failed load");
                }
                return Err(err);
            }
        }
        info!(etl_name = etl_name.as_str(); "Process finished");
        Ok(())
    }
}

fn report<T>(etl_name: &str, phase: &str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        error!(etl_name = etl_name, phase = phase, err = err.message.as_str(); "ETL phase failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::errors::{Error, ErrorKind};

    /// Stage that records which phases ran and can be told to fail in one of them.
    #[derive(Default)]
    struct Recorder {
        cached: bool,
        fail_in: Option<&'static str>,
        phases: Vec<&'static str>,
        cleaned: std::cell::Cell<bool>,
    }

    impl Recorder {
        fn step(&mut self, phase: &'static str) -> Result<()> {
            self.phases.push(phase);
            match self.fail_in {
                Some(failing) if failing == phase => Err(Error::new(ErrorKind::Io, format!("{phase} broke"))),
                _ => Ok(()),
            }
        }
    }

    impl Etl for Recorder {
        type Input = ();
        type Output = ();

        fn etl_name(&self) -> &str {
            "recorder"
        }

        fn is_cached(&self, _dir: &Path) -> Result<bool> {
            Ok(self.cached)
        }

        fn clean(&self, _dir: &Path) -> Result<()> {
            self.cleaned.set(true);
            Ok(())
        }

        fn extract(&mut self, _dir: &Path) -> Result<()> {
            self.step("extract")
        }

        fn transform(&mut self, _input: ()) -> Result<()> {
            self.step("transform")
        }

        fn load(&mut self, _dir: &Path, _output: ()) -> Result<()> {
            self.step("load")
        }
    }

    #[test]
    fn runs_all_phases_in_order() {
        let mut stage = Recorder::default();
        stage.process(Path::new(".")).unwrap();
        assert_eq!(stage.phases, vec!["extract", "transform", "load"]);
        assert!(!stage.cleaned.get());
    }

    #[test]
    fn cached_stage_skips_every_phase() {
        let mut stage = Recorder { cached: true, ..Default::default() };
        stage.process(Path::new(".")).unwrap();
        assert!(stage.phases.is_empty());
    }

    #[test]
    fn stops_at_first_failing_phase() {
        let mut stage = Recorder { fail_in: Some("transform"), ..Default::default() };
        let err = stage.process(Path::new(".")).unwrap_err();
        assert_eq!(err.message, "transform broke");
        assert_eq!(stage.phases, vec!["extract", "transform"]);
        assert!(!stage.cleaned.get());
    }

    #[test]
    fn failed_load_is_cleaned_up() {
        let mut stage = Recorder { fail_in: Some("load"), ..Default::default() };
        let err = stage.process(Path::new(".")).unwrap_err();
        assert_eq!(err.message, "load broke");
        assert!(stage.cleaned.get());
    }
}

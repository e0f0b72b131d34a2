/// Worker identification: which entries of the OS process table are "the worker".
///
/// A process matches when the executable pattern matches its resolved
/// executable path or its `argv[0]`, and the argument pattern matches one of
/// the remaining argv elements in full. Elements are tested one at a time,
/// never as a joined command line, so `grep youtube_monitor.py` or
/// `vim youtube_monitor.py` never look like the worker.
use regex::Regex;

#[derive(Debug, Clone)]
pub struct WorkerSignature {
    executable: Regex,
    argument: Regex,
}

impl WorkerSignature {
    pub fn new(executable: &str, argument: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            executable: Regex::new(executable)?,
            argument: Regex::new(argument)?,
        })
    }

    /// Evaluate one process-table entry.
    pub fn matches(&self, exe: Option<&str>, argv: &[String]) -> bool {
        let Some((argv0, rest)) = argv.split_first() else {
            return false;
        };
        let exe_matches =
            exe.is_some_and(|e| self.executable.is_match(e)) || self.executable.is_match(argv0);
        exe_matches && rest.iter().any(|arg| self.argument.is_match(arg))
    }

    pub fn executable_pattern(&self) -> &str {
        self.executable.as_str()
    }

    pub fn argument_pattern(&self) -> &str {
        self.argument.as_str()
    }
}

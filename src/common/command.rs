use std::{
    ffi::{OsStr, OsString},
    fmt,
    path::PathBuf,
};

/// One fully parsed input line, ready to be dispatched.
///
/// The first element of `argv` is the program name; the remaining elements
/// are its arguments. A command is immutable once built and is owned by the
/// dispatcher for the duration of a single execution.
#[derive(Debug, Default)]
#[cfg_attr(test, derive(PartialEq))]
pub struct ParsedCommand {
    pub(crate) argv: Vec<OsString>,
    pub(crate) input_file: Option<PathBuf>,
    pub(crate) output_file: Option<PathBuf>,
    pub(crate) is_bg: bool,
}

impl ParsedCommand {
    pub(crate) fn program(&self) -> &OsStr {
        self.argv
            .first()
            .map(OsString::as_os_str)
            .unwrap_or_else(|| OsStr::new(""))
    }

    pub(crate) fn arguments(&self) -> &[OsString] {
        self.argv.get(1..).unwrap_or_default()
    }
}

impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = self
            .argv
            .iter()
            .map(|word| word.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{words}")?;
        if let Some(path) = &self.input_file {
            write!(f, " < {}", path.display())?;
        }
        if let Some(path) = &self.output_file {
            write!(f, " > {}", path.display())?;
        }
        if self.is_bg {
            write!(f, " &")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ParsedCommand;
    use pretty_assertions::assert_eq;
    use std::ffi::OsString;

    #[test]
    fn program_and_arguments_split() {
        let cmd = ParsedCommand {
            argv: vec!["wc".into(), "-l".into()],
            ..Default::default()
        };
        assert_eq!(cmd.program(), "wc");
        assert_eq!(cmd.arguments(), vec![OsString::from("-l")]);
    }

    #[test]
    fn display_round_trips_the_shape_of_the_line() {
        let cmd = ParsedCommand {
            argv: vec!["sort".into()],
            input_file: Some("in.txt".into()),
            output_file: Some("out.txt".into()),
            is_bg: true,
        };
        assert_eq!(cmd.to_string(), "sort < in.txt > out.txt &");
    }
}

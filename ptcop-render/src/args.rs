use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
    fmt,
    path::PathBuf,
};

use clap::{crate_name, crate_version, Arg, ArgAction, Command};
use log::warn;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Flag {
    Help,
    Stdout,
    Format,
    Loops,
    Mute,
    Volume,
}

/// A recognized argument, with every spelling that selects it.
#[derive(Debug)]
pub struct FlagSpec {
    pub flag: Flag,
    pub spellings: &'static [&'static str],
    pub takes_value: bool,
    pub value_name: &'static str,
    pub help: &'static str,
}

// spellings must not overlap between entries
pub static FLAGS: &[FlagSpec] = &[
    FlagSpec {
        flag: Flag::Help,
        spellings: &["--help", "-h"],
        takes_value: false,
        value_name: "",
        help: "Print this help and exit",
    },
    FlagSpec {
        flag: Flag::Stdout,
        spellings: &["--stdout"],
        takes_value: false,
        value_name: "",
        help: "Write the rendered stream to standard output (single file only)",
    },
    FlagSpec {
        flag: Flag::Format,
        spellings: &["--format", "-f"],
        takes_value: true,
        value_name: "FORMAT",
        help: "Output format: ogg (default), wav or flac (written as wav)",
    },
    FlagSpec {
        flag: Flag::Loops,
        spellings: &["--loops", "-l"],
        takes_value: true,
        value_name: "COUNT",
        help: "How often to jump back to the repeat point, 0 disables looping [default: 1]",
    },
    FlagSpec {
        flag: Flag::Mute,
        spellings: &["--mute", "-m"],
        takes_value: true,
        value_name: "UNITS",
        help: "Comma separated unit indices to silence",
    },
    FlagSpec {
        flag: Flag::Volume,
        spellings: &["--volume"],
        takes_value: true,
        value_name: "VOLUME",
        help: "Master volume between 0.0 and 1.0 [default: 0.8]",
    },
];

pub fn find_flag(token: &str) -> Option<&'static FlagSpec> {
    FLAGS
        .iter()
        .find(|spec| spec.spellings.iter().any(|s| *s == token))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Ogg,
    Wav,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Ogg => "ogg",
            Self::Wav => "wav",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ogg => write!(f, "OGG"),
            Self::Wav => write!(f, "WAV"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub loops: u32,
    pub mute: Vec<usize>,
    pub volume: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            loops: 1,
            mute: Vec::new(),
            volume: 0.8,
        }
    }
}

/// Settings for a whole run, built once from the command line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunConfig {
    pub format: OutputFormat,
    pub to_stdout: bool,
    pub render: RenderSettings,
}

pub type FileSet = BTreeSet<PathBuf>;

#[derive(Debug, PartialEq)]
pub enum Resolution {
    Help,
    Run { config: RunConfig, files: FileSet },
}

#[derive(Error, Debug, PartialEq)]
pub enum ArgError {
    #[error("Unknown argument '{0}'")]
    UnknownArgument(String),
    #[error("Argument '{0}' requires a parameter")]
    MissingParameter(String),
    #[error("{0}")]
    ConflictingOptions(&'static str),
    #[error("Invalid value '{value}' for '{flag}': {reason}")]
    InvalidValue {
        flag: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Process arguments as text. Anything that isn't valid UTF-8 is converted
/// lossily with a warning, such a path most likely won't be found.
pub fn to_text<I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = OsString>,
{
    raw.into_iter()
        .map(|arg| match arg.into_string() {
            Ok(text) => text,
            Err(arg) => {
                let text = arg.to_string_lossy().into_owned();
                warn!("Argument {arg:?} is not valid UTF-8, using '{text}' instead");
                text
            }
        })
        .collect()
}

/// Splits raw arguments on '=' and whitespace, so `--format=wav` becomes two tokens.
pub fn tokenize<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .flat_map(|arg| {
            arg.as_ref()
                .replace('=', " ")
                .split_whitespace()
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// matched spelling and its value, the last occurrence of a flag wins
type ParsedArgs = BTreeMap<Flag, (&'static str, String)>;

fn classify(tokens: &[String]) -> Result<(ParsedArgs, FileSet), ArgError> {
    let mut parsed = ParsedArgs::new();
    let mut files = FileSet::new();
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        if !token.starts_with('-') {
            files.insert(PathBuf::from(token));
            continue;
        }
        let spec = find_flag(token).ok_or_else(|| ArgError::UnknownArgument(token.clone()))?;
        let spelling = spec
            .spellings
            .iter()
            .copied()
            .find(|s| *s == token.as_str())
            .unwrap_or(spec.spellings[0]);
        let value = if spec.takes_value {
            iter.next_if(|next| !next.starts_with('-'))
                .cloned()
                .ok_or_else(|| ArgError::MissingParameter(token.clone()))?
        } else {
            String::new()
        };
        parsed.insert(spec.flag, (spelling, value));
    }
    Ok((parsed, files))
}

fn parse_format(value: &str) -> OutputFormat {
    match value.to_ascii_uppercase().as_str() {
        "OGG" => OutputFormat::Ogg,
        "WAV" => OutputFormat::Wav,
        "FLAC" => {
            warn!("FLAC output is not supported yet; writing WAV instead");
            OutputFormat::Wav
        }
        _ => {
            warn!("Unknown format type '{value}'; Resorting to OGG");
            OutputFormat::Ogg
        }
    }
}

fn parse_mute(spelling: &'static str, value: &str) -> Result<Vec<usize>, ArgError> {
    value
        .split(',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse().map_err(|_| ArgError::InvalidValue {
                flag: spelling,
                value: value.to_owned(),
                reason: "expected comma separated unit indices",
            })
        })
        .collect()
}

pub fn resolve(tokens: &[String]) -> Result<Resolution, ArgError> {
    // help wins over everything else on the line, even invalid arguments
    if tokens
        .iter()
        .any(|t| find_flag(t).is_some_and(|spec| spec.flag == Flag::Help))
    {
        return Ok(Resolution::Help);
    }

    let (parsed, files) = classify(tokens)?;
    let mut config = RunConfig::default();

    if parsed.contains_key(&Flag::Stdout) {
        if files.len() > 1 {
            return Err(ArgError::ConflictingOptions(
                "Standard output cannot be used when rendering multiple files.",
            ));
        }
        config.to_stdout = true;
    }

    if let Some((_, value)) = parsed.get(&Flag::Format) {
        if !value.is_empty() {
            config.format = parse_format(value);
        }
    }

    if let Some(&(spelling, ref value)) = parsed.get(&Flag::Loops) {
        config.render.loops = value.parse().map_err(|_| ArgError::InvalidValue {
            flag: spelling,
            value: value.clone(),
            reason: "expected a non-negative integer",
        })?;
    }

    if let Some(&(spelling, ref value)) = parsed.get(&Flag::Mute) {
        config.render.mute = parse_mute(spelling, value)?;
    }

    if let Some(&(spelling, ref value)) = parsed.get(&Flag::Volume) {
        config.render.volume = value
            .parse::<f32>()
            .ok()
            .filter(|v| (0.0..=1.0).contains(v))
            .ok_or_else(|| ArgError::InvalidValue {
                flag: spelling,
                value: value.clone(),
                reason: "expected a number between 0.0 and 1.0",
            })?;
    }

    Ok(Resolution::Run { config, files })
}

/// The usage text, rendered from the flag table.
pub fn usage() -> String {
    let mut cmd = Command::new(crate_name!())
        .version(crate_version!())
        .about("Renders pxtone projects to OGG or WAV")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("FILE")
                .help("pxtone project files to render")
                .num_args(1..)
                .required(true),
        );
    for spec in FLAGS {
        let mut arg = Arg::new(spec.spellings[0].trim_start_matches('-')).help(spec.help);
        for spelling in spec.spellings {
            if let Some(long) = spelling.strip_prefix("--") {
                arg = arg.long(long);
            } else if let Some(short) = spelling.strip_prefix('-').and_then(|s| s.chars().next())
            {
                arg = arg.short(short);
            }
        }
        arg = match (spec.flag, spec.takes_value) {
            (Flag::Help, _) => arg.action(ArgAction::Help),
            (_, true) => arg.value_name(spec.value_name).action(ArgAction::Set),
            (_, false) => arg.action(ArgAction::SetTrue),
        };
        cmd = cmd.arg(arg);
    }
    cmd.render_help().to_string()
}

#[cfg(test)]
mod tests {
    use std::{ffi::OsString, path::PathBuf};

    use super::{
        find_flag, resolve, to_text, tokenize, usage, ArgError, OutputFormat, Resolution, RunConfig,
        FLAGS,
    };

    fn run(args: &[&str]) -> Result<Resolution, ArgError> {
        resolve(&tokenize(args))
    }

    fn config(args: &[&str]) -> RunConfig {
        match run(args) {
            Ok(Resolution::Run { config, .. }) => config,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn spellings_are_disjoint() {
        for (i, a) in FLAGS.iter().enumerate() {
            for b in FLAGS.iter().skip(i + 1) {
                assert!(a.spellings.iter().all(|s| !b.spellings.contains(s)));
            }
        }
        assert!(find_flag("--format").is_some());
        assert!(find_flag("--form").is_none());
    }

    #[test]
    fn arguments_as_text() {
        let args = to_text([OsString::from("a.ptcop"), OsString::from("--stdout")]);
        assert_eq!(args, vec!["a.ptcop", "--stdout"]);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_argument_is_replaced() {
        use std::os::unix::ffi::OsStringExt;

        let args = to_text([OsString::from_vec(b"caf\xE9.ptcop".to_vec())]);
        assert_eq!(args, vec!["caf\u{FFFD}.ptcop"]);
    }

    #[test]
    fn tokenize_splits_on_equals_and_spaces() {
        assert_eq!(
            tokenize(["--format=wav", "a b.ptcop", "  ", "c.ptcop"]),
            vec!["--format", "wav", "a", "b.ptcop", "c.ptcop"]
        );
    }

    #[test]
    fn equals_and_space_are_equivalent() {
        for format in ["ogg", "wav", "flac", "mp3"] {
            let joined = format!("--format={format}");
            assert_eq!(
                run(&["x.ptcop", joined.as_str()]),
                run(&["x.ptcop", "--format", format])
            );
        }
    }

    #[test]
    fn format_is_case_insensitive() {
        for value in ["OGG", "ogg", "OgG"] {
            assert_eq!(config(&["a.ptcop", "-f", value]).format, OutputFormat::Ogg);
        }
        assert_eq!(config(&["a.ptcop", "-f", "Wav"]).format, OutputFormat::Wav);
    }

    #[test]
    fn flac_and_unknown_formats() {
        assert_eq!(config(&["a.ptcop", "-f", "flac"]).format, OutputFormat::Wav);
        assert_eq!(config(&["a.ptcop", "-f", "mp3"]).format, OutputFormat::Ogg);
    }

    #[test]
    fn last_format_wins() {
        let cfg = config(&["a.ptcop", "--format", "wav", "--format", "ogg"]);
        assert_eq!(cfg.format, OutputFormat::Ogg);
        let cfg = config(&["a.ptcop", "--format", "ogg", "-f", "wav"]);
        assert_eq!(cfg.format, OutputFormat::Wav);
    }

    #[test]
    fn stdout_needs_single_file() {
        let cfg = config(&["only.ptcop", "--stdout"]);
        assert!(cfg.to_stdout);
        assert_eq!(cfg.format, OutputFormat::Ogg);

        assert!(matches!(
            run(&["a.ptcop", "b.ptcop", "--stdout"]),
            Err(ArgError::ConflictingOptions(..))
        ));
        // duplicates collapse, so this is still a single file
        assert!(config(&["a.ptcop", "a.ptcop", "--stdout"]).to_stdout);
    }

    #[test]
    fn unknown_argument_fails() {
        assert_eq!(
            run(&["a.ptcop", "--bogus"]),
            Err(ArgError::UnknownArgument("--bogus".into()))
        );
        assert_eq!(
            run(&["-", "a.ptcop"]),
            Err(ArgError::UnknownArgument("-".into()))
        );
    }

    #[test]
    fn missing_parameter() {
        assert_eq!(
            run(&["a.ptcop", "--format"]),
            Err(ArgError::MissingParameter("--format".into()))
        );
        assert_eq!(
            run(&["-f", "--stdout", "a.ptcop"]),
            Err(ArgError::MissingParameter("-f".into()))
        );
    }

    #[test]
    fn help_short_circuits() {
        assert_eq!(run(&["a.ptcop", "--help"]), Ok(Resolution::Help));
        assert_eq!(run(&["-h"]), Ok(Resolution::Help));
        assert_eq!(run(&["--bogus", "a.ptcop", "b.ptcop", "--stdout", "-h"]), Ok(Resolution::Help));
        assert_eq!(run(&["--format", "--help"]), Ok(Resolution::Help));
    }

    #[test]
    fn files_are_ordered_and_deduplicated() {
        match run(&["b.ptcop", "a.ptcop", "b.ptcop", "--format", "wav"]) {
            Ok(Resolution::Run { config, files }) => {
                assert_eq!(config.format, OutputFormat::Wav);
                assert!(!config.to_stdout);
                let files: Vec<_> = files.into_iter().collect();
                assert_eq!(files, vec![PathBuf::from("a.ptcop"), PathBuf::from("b.ptcop")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn flags_without_files() {
        match run(&["--format", "wav"]) {
            Ok(Resolution::Run { config, files }) => {
                assert_eq!(config.format, OutputFormat::Wav);
                assert!(files.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn render_settings() {
        let cfg = config(&["a.ptcop"]);
        assert_eq!(cfg.render.loops, 1);
        assert!(cfg.render.mute.is_empty());
        assert_eq!(cfg.render.volume, 0.8);

        let cfg = config(&["a.ptcop", "--loops=0", "-m", "0,2", "--volume", "0.5"]);
        assert_eq!(cfg.render.loops, 0);
        assert_eq!(cfg.render.mute, vec![0, 2]);
        assert_eq!(cfg.render.volume, 0.5);

        assert!(matches!(
            run(&["a.ptcop", "--volume", "2"]),
            Err(ArgError::InvalidValue { flag: "--volume", .. })
        ));
        assert!(matches!(
            run(&["a.ptcop", "-l", "many"]),
            Err(ArgError::InvalidValue { flag: "-l", .. })
        ));
        assert!(matches!(
            run(&["a.ptcop", "--mute", "1,x"]),
            Err(ArgError::InvalidValue { .. })
        ));
    }

    #[test]
    fn usage_lists_every_flag() {
        let text = usage();
        for spec in FLAGS {
            for spelling in spec.spellings {
                assert!(text.contains(spelling), "{spelling} missing from usage");
            }
        }
    }
}

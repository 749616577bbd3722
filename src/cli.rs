use clap::Parser;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "modelzip")]
#[command(version)]
#[command(about = "Inspect and unpack ZIP-packaged model artifacts", long_about = None)]
#[command(after_help = "Examples:\n  \
  modelzip -l model.pt                 list members of a PyTorch checkpoint\n  \
  modelzip -t model.pt                 verify CRCs and structure of every member\n  \
  modelzip -p model.pt '*/data.pkl'    dump the pickle stream to stdout\n  \
  modelzip model.pt -d out -x '*/data/*'   extract everything but tensor storage")]
pub struct Cli {
    /// ZIP file path
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Members to process, exact names or glob patterns (default: all)
    #[arg(value_name = "MEMBERS")]
    pub members: Vec<String>,

    /// List members (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely, with sizes, ratio and timestamps
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Test archive integrity
    #[arg(short = 't')]
    pub test: bool,

    /// Extract members to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract members into DIR
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude members that follow
    #[arg(short = 'x', value_name = "PATTERN", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Password for encrypted members
    #[arg(short = 'P', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Encoding of member names without the UTF-8 flag (default: cp437)
    #[arg(long = "encoding", value_name = "LABEL")]
    pub encoding: Option<String>,

    /// Emit library debug logs on stderr
    #[arg(long = "verbose-log")]
    pub verbose_log: bool,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose_log {
            "modelzip=debug"
        } else if self.is_very_quiet() {
            "error"
        } else {
            "warn"
        }
    }

    /// True when the member `name` is selected by the positional patterns
    /// and not excluded by `-x`.
    pub fn selects(&self, name: &str) -> bool {
        if !self.members.is_empty() && !self.members.iter().any(|m| member_matches(m, name)) {
            return false;
        }
        !self
            .exclude
            .iter()
            .any(|x| name.contains(x.as_str()) || glob_match(x, name))
    }
}

/// Exact name, base name, or glob match.
fn member_matches(pattern: &str, name: &str) -> bool {
    if has_glob_chars(pattern) {
        return glob_match(pattern, name);
    }
    let basename = Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    name == pattern || basename == pattern
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// `*` matches any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // Backtracks to the most recent star only.
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("modelzip").chain(args.iter().copied()))
    }

    #[test]
    fn glob() {
        assert!(glob_match("*.pkl", "archive/data.pkl"));
        assert!(glob_match("archive/data/?", "archive/data/0"));
        assert!(glob_match("a*b*c", "a-b-b-c"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("*.pkl", "archive/version"));
        assert!(!glob_match("?", ""));
        assert!(!glob_match("a*b", "a-b-c"));
    }

    #[test]
    fn selection_by_name_and_pattern() {
        let args = cli(&["model.pt", "data.pkl", "*/version"]);
        assert!(args.selects("archive/data.pkl"));
        assert!(args.selects("archive/version"));
        assert!(!args.selects("archive/data/0"));

        let all = cli(&["model.pt"]);
        assert!(all.selects("anything"));
    }

    #[test]
    fn exclusion_wins() {
        let args = cli(&["model.pt", "-x", "data/"]);
        assert!(args.selects("archive/data.pkl"));
        assert!(!args.selects("archive/data/0"));
    }

    #[test]
    fn quiet_levels() {
        assert!(cli(&["-p", "model.pt"]).is_quiet());
        assert_eq!(cli(&["-qq", "model.pt"]).log_filter(), "error");
        assert_eq!(cli(&["--verbose-log", "model.pt"]).log_filter(), "modelzip=debug");
        assert_eq!(cli(&["model.pt"]).log_filter(), "warn");
    }

    #[test]
    fn password_and_encoding() {
        let args = cli(&["-P", "secret", "--encoding", "shift_jis", "model.pt"]);
        assert_eq!(args.password.as_deref(), Some("secret"));
        assert_eq!(args.encoding.as_deref(), Some("shift_jis"));
    }
}

use camino::Utf8PathBuf;

use crate::process::CommandSpec;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Where and how to reach a remote replica's host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<Utf8PathBuf>,
}

#[derive(Debug, thiserror::Error)]
#[error("argument cannot be quoted for a remote shell: {0:?}")]
pub struct QuoteError(pub String);

impl SshTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
        }
    }

    /// `ssh` followed by connection options, without a destination.
    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["ssh".to_string()];
        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            args.push("-l".into());
            args.push(user.to_string());
        }
        if let Some(port) = self.port.filter(|p| *p != DEFAULT_SSH_PORT) {
            args.push("-p".into());
            args.push(port.to_string());
        }
        if let Some(key) = &self.identity_file {
            args.push("-i".into());
            args.push(key.to_string());
        }
        args
    }

    /// Value for rsync's `-e`, e.g. `ssh -l alice -p 2222`.
    pub fn rsh(&self) -> Result<String, QuoteError> {
        let args = self.base_args();
        shlex::try_join(args.iter().map(String::as_str)).map_err(|_| QuoteError(args.join(" ")))
    }

    /// `host:path` in rsync's remote-path syntax.
    pub fn rsync_path(&self, path: &str) -> String {
        format!("{}:{}", self.host, path)
    }

    /// Run `words` on the remote host. ssh hands the command to a remote shell as one
    /// string, so every word is quoted.
    pub fn command<S: AsRef<str>>(&self, words: &[S]) -> Result<CommandSpec, QuoteError> {
        let remote = quote_words(words)?;
        let mut args = self.base_args();
        let program = args.remove(0);
        Ok(CommandSpec::new(program)
            .args(args)
            .arg(self.host.clone())
            .arg(remote))
    }

    /// Run a pre-built shell snippet on the remote host as-is.
    pub fn shell(&self, script: impl Into<String>) -> CommandSpec {
        let mut args = self.base_args();
        let program = args.remove(0);
        CommandSpec::new(program)
            .args(args)
            .arg(self.host.clone())
            .arg(script)
    }
}

pub fn quote_words<S: AsRef<str>>(words: &[S]) -> Result<String, QuoteError> {
    shlex::try_join(words.iter().map(AsRef::as_ref)).map_err(|_| {
        QuoteError(
            words
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(" "),
        )
    })
}

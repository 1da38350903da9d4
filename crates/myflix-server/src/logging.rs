//! Log setup with secret redaction.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
pub struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    token_path: Regex,
    api_hash_env: Regex,
    api_hash_field: Regex,
    phone_env: Regex,
    phone: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/(?:file/)?bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_path: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            api_hash_env: Regex::new(r"TELEGRAM_API_HASH=[^\s&]+")?,
            api_hash_field: Regex::new(r#"(api_hash["']?\s*[:=]\s*["']?)[0-9A-Za-z]+"#)?,
            phone_env: Regex::new(r"TELEGRAM_PHONE_NUMBER=[^\s&]+")?,
            phone: Regex::new(r"\+[0-9]{7,15}")?,
        })
    }

    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token_url
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token_bare
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token_path
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .api_hash_env
            .replace_all(&output, "TELEGRAM_API_HASH=[MASKED]")
            .to_string();
        output = self
            .api_hash_field
            .replace_all(&output, "$1[MASKED]")
            .to_string();
        output = self
            .phone_env
            .replace_all(&output, "TELEGRAM_PHONE_NUMBER=[MASKED]")
            .to_string();
        output = self.phone.replace_all(&output, "[PHONE]").to_string();
        output
    }
}

pub struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    pub const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text may differ in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    pub const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `DEBUG_MODE=true` turns everything
/// up to debug.
pub fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,hyper=warn,h2=error,reqwest=warn,teloxide=warn,tower=warn")
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> RedactionPatterns {
        RedactionPatterns::new().expect("patterns compile")
    }

    #[test]
    fn test_redacts_bot_token_in_urls() {
        let line = "GET https://api.telegram.org/file/bot123456789:AAEhBOweik6ad6PsVMRxjeQKv2Wh9tEvAbc/videos/file_1.mp4 failed";
        let redacted = patterns().redact(line);
        assert!(!redacted.contains("AAEhBOweik6ad6PsVMRxjeQKv2Wh9tEvAbc"));
        assert!(redacted.contains("/file/bot[TELEGRAM_TOKEN]/videos"));
    }

    #[test]
    fn test_redacts_bare_token() {
        let redacted = patterns().redact("token 123456789:AAEhBOweik6ad6PsVMRxjeQKv2Wh9tEvAbc rejected");
        assert_eq!(redacted, "token [TELEGRAM_TOKEN] rejected");
    }

    #[test]
    fn test_redacts_user_credentials() {
        let p = patterns();
        assert_eq!(
            p.redact("TELEGRAM_API_HASH=0123456789abcdef0123456789abcdef"),
            "TELEGRAM_API_HASH=[MASKED]"
        );
        assert_eq!(
            p.redact(r#"{"api_hash": "0123456789abcdef"}"#),
            r#"{"api_hash": "[MASKED]"}"#
        );
        assert_eq!(p.redact("login as +491701234567"), "login as [PHONE]");
        assert_eq!(
            p.redact("TELEGRAM_PHONE_NUMBER=+491701234567"),
            "TELEGRAM_PHONE_NUMBER=[MASKED]"
        );
    }

    #[test]
    fn test_leaves_ordinary_lines_alone() {
        let line = "📡 Fetched 12 movies from @films (40 posts scanned)";
        assert_eq!(patterns().redact(line), line);
    }

    #[test]
    fn test_writer_reports_original_length() {
        let mut sink = Vec::new();
        {
            let mut writer = RedactingWriter::new(&mut sink, Arc::new(patterns()));
            let input = b"call +491701234567 now";
            assert_eq!(writer.write(input).expect("write"), input.len());
        }
        assert_eq!(String::from_utf8(sink).expect("utf-8"), "call [PHONE] now");
    }
}

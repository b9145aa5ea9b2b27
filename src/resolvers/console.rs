use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{
    CaptchaTask, ChallengeResolver, PhoneTask, ResolverError, ResolverResult, TwoFactorTask,
};

/// Prompts on stdout and reads the answer from stdin.
///
/// An empty answer declines the challenge.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleResolver;

impl ConsoleResolver {
    pub fn new() -> Self {
        Self
    }

    async fn ask(&self, kind: &'static str, prompt: String) -> ResolverResult {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

        let answer = line.trim();
        if answer.is_empty() {
            return Err(ResolverError::Declined(kind));
        }
        Ok(answer.to_string())
    }
}

#[async_trait]
impl ChallengeResolver for ConsoleResolver {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn resolve_captcha(&self, task: &CaptchaTask) -> ResolverResult {
        self.ask(
            "captcha",
            format!("Open captcha url: {}\nEnter captcha text: ", task.image_url),
        )
        .await
    }

    async fn resolve_2fa_code(&self, task: &TwoFactorTask) -> ResolverResult {
        let hint = match (&task.validation_type, &task.phone_mask) {
            (Some(kind), Some(mask)) => format!(" ({kind}, sent to {mask})"),
            (Some(kind), None) => format!(" ({kind})"),
            _ => String::new(),
        };
        self.ask("two-factor", format!("Enter authentication code{hint}: "))
            .await
    }

    async fn resolve_phone_digits(&self, task: &PhoneTask) -> ResolverResult {
        self.ask(
            "phone confirmation",
            format!(
                "Enter missing digits of your phone number {}...{}: ",
                task.prefix, task.suffix
            ),
        )
        .await
    }
}

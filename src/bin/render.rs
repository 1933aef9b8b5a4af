use anyhow::{Context, Result};
use postbox::{
    config::Config,
    generator::{EmailGenerator, EmailKind, GenerationRequest},
};
use std::collections::BTreeMap;
use std::io::{self, Read};

/// Render an email body read from stdin.
///
/// Usage: `render [kind] [recipient-email]`
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = Config::from_env()?;

    let mut args = std::env::args().skip(1);
    let kind = EmailKind::parse(&args.next().unwrap_or_default());
    let recipient = args
        .next()
        .map(|email| BTreeMap::from([("email".to_string(), email)]))
        .unwrap_or_default();

    let mut content = String::new();
    io::stdin()
        .read_to_string(&mut content)
        .context("Failed to read email content from stdin")?;

    let mut request = GenerationRequest::new(kind, content);
    request.recipient = recipient;

    let generator = EmailGenerator::new(config);
    let output = generator.generate(request)?;
    println!("{output}");

    Ok(())
}

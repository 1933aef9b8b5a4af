#![no_main]

use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;

use postbox::config::Config;
use postbox::generator::{EmailGenerator, EmailKind, GenerationRequest};

fuzz_target!(|data: &[u8]| {
    let html = String::from_utf8_lossy(data).to_string();

    let mut request = GenerationRequest::new(EmailKind::RawHtml, html.clone());
    request.recipient = BTreeMap::from([("email".to_string(), "fuzz@example.com".to_string())]);

    // Post-processing must always produce an email, whatever the markup.
    let generator = EmailGenerator::new(Config::default());
    let _ = generator.post_process(&html, &request);
});

//! Email generation: picks a strategy for the request's kind, assembles the
//! markup and runs it through the post-processing pipeline.

mod errors;
mod hooks;
mod pipeline;
pub mod plain_text;
mod request;

#[cfg(test)]
mod tests;

pub use errors::{GenerateError, StepError};
pub use hooks::{Filter, Hook, Hooks, TrackingCheck};
pub use pipeline::{PREHEADER_STYLE, balance_tags, inject_preheader, inject_tracking_pixel};
pub use request::{DEFAULT_TEMPLATE, EmailKind, GenerationRequest, RequestUpdate};

use html_escape::encode_text;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::inliner::{CssInliner, SelectorInliner};
use crate::links::fix_double_protocols;
use crate::merge_tags::{MergeScope, MergeTags, RecipientMergeTags};
use crate::sanitizer::clean_html;
use crate::shortcodes::{ShortcodeRegistry, unautop};
use crate::templates::{
    FALLBACK_TEMPLATE, InMemoryTemplates, TemplateRegistry, VISUAL_TEMPLATE, autop,
};
use crate::tracking::{ActionUrls, SignedActionUrls};
use pipeline::run_step;
use plain_text::{UNSUBSCRIBE_LINE, html_to_text};

/// Expands the blocks of a visual email into markup.
pub trait BlockRenderer: Send + Sync {
    fn render(&self, content: &str) -> String;
}

/// Treats visual content as ready-made markup.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughBlocks;

impl BlockRenderer for PassthroughBlocks {
    fn render(&self, content: &str) -> String {
        content.to_string()
    }
}

/// Renders email bodies. Holds only read-only collaborators, so one generator
/// can serve any number of recipients, from any number of threads.
pub struct EmailGenerator {
    config: Config,
    templates: Arc<dyn TemplateRegistry>,
    merge_tags: Arc<dyn MergeTags>,
    shortcodes: Arc<ShortcodeRegistry>,
    actions: Arc<dyn ActionUrls>,
    inliner: Arc<dyn CssInliner>,
    blocks: Arc<dyn BlockRenderer>,
    hooks: Arc<Hooks>,
}

impl EmailGenerator {
    pub fn new(config: Config) -> Self {
        Self {
            templates: Arc::new(InMemoryTemplates::new()),
            merge_tags: Arc::new(RecipientMergeTags::new(config.site_url().clone())),
            shortcodes: Arc::new(ShortcodeRegistry::new()),
            actions: Arc::new(SignedActionUrls::from_config(&config)),
            inliner: Arc::new(SelectorInliner::new()),
            blocks: Arc::new(PassthroughBlocks),
            hooks: Arc::new(Hooks::new()),
            config,
        }
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateRegistry>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_merge_tags(mut self, merge_tags: Arc<dyn MergeTags>) -> Self {
        self.merge_tags = merge_tags;
        self
    }

    pub fn with_shortcodes(mut self, shortcodes: ShortcodeRegistry) -> Self {
        self.shortcodes = Arc::new(shortcodes);
        self
    }

    pub fn with_action_urls(mut self, actions: Arc<dyn ActionUrls>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_inliner(mut self, inliner: Arc<dyn CssInliner>) -> Self {
        self.inliner = inliner;
        self
    }

    pub fn with_block_renderer(mut self, blocks: Arc<dyn BlockRenderer>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Render the email body for `request`.
    ///
    /// Fails only when there is no content; every later problem degrades the
    /// output instead of aborting it.
    #[instrument(skip_all, fields(kind = %request.kind, template = %request.template))]
    pub fn generate(&self, mut request: GenerationRequest) -> Result<String, GenerateError> {
        if request.content.is_empty() {
            return Err(GenerateError::EmptyContent);
        }

        let output = match request.kind.clone() {
            EmailKind::PlainText => self.generate_plain_text(&request),
            EmailKind::RawHtml => self.generate_raw_html(&mut request),
            EmailKind::Normal => self.generate_normal(&mut request),
            EmailKind::Visual => self.generate_visual(&request),
            EmailKind::Other(kind) => self.generate_unknown(&kind, &request),
        };

        Ok(self.hooks.apply(Hook::Generate, output, &request))
    }

    /// Apply `update` to `request`, then generate.
    pub fn generate_with(
        &self,
        mut request: GenerationRequest,
        update: RequestUpdate,
    ) -> Result<String, GenerateError> {
        request.merge(update);
        self.generate(request)
    }

    fn merge_scope<'a>(&'a self, request: &'a GenerationRequest) -> MergeScope<'a> {
        MergeScope {
            recipient: &request.recipient,
            campaign_id: request.campaign_id,
            actions: self.actions.as_ref(),
        }
    }

    fn generate_plain_text(&self, request: &GenerationRequest) -> String {
        let mut content = request.content.trim().to_string();
        if self.config.plain_text_unsubscribe()
            && !content.to_lowercase().contains("[[unsubscribe_url]]")
        {
            content.push_str(UNSUBSCRIBE_LINE);
        }

        let content = self.merge_tags.substitute(&content, &self.merge_scope(request));
        let content = unautop(&content, &self.shortcodes);
        let content = self.shortcodes.execute(&content);
        let content = run_step("balance tags", content, balance_tags);
        let content = fix_double_protocols(&content);

        self.hooks
            .apply(Hook::PlainText, html_to_text(&content), request)
    }

    fn generate_raw_html(&self, request: &mut GenerationRequest) -> String {
        request.preview_text.clear();
        self.post_process(request.content.trim(), request)
    }

    fn generate_normal(&self, request: &mut GenerationRequest) -> String {
        if !self.templates.is_registered(&request.template) {
            debug!(template = %request.template, "unknown template, falling back to none");
            request.template = FALLBACK_TEMPLATE.to_string();
        }

        let html = match self.templates.sections(&request.template) {
            Some(sections) => sections.render(
                &request.heading,
                &request.content,
                &autop(&request.footer_text),
            ),
            None => request.content.clone(),
        };

        let html = self.hooks.apply(Hook::AfterTemplate, html, request);
        self.post_process(&html, request)
    }

    fn generate_visual(&self, request: &GenerationRequest) -> String {
        let body = self.blocks.render(&request.content);

        let html = match self.templates.sections(VISUAL_TEMPLATE) {
            Some(sections) => sections.render(&request.subject, &body, ""),
            None => body,
        };

        let html = self.hooks.apply(Hook::AfterTemplate, html, request);
        self.post_process(&html, request)
    }

    /// No strategy exists for `kind`; the content goes out as given unless
    /// the config asks for it to be cleaned.
    fn generate_unknown(&self, kind: &str, request: &GenerationRequest) -> String {
        if !self.config.clean_unknown_kinds() {
            warn!(kind, "no generation strategy for email kind, sending content unchanged");
            return request.content.clone();
        }

        warn!(kind, "no generation strategy for email kind, sending cleaned content");
        match clean_html(&request.content) {
            Ok(html) => html,
            Err(err) => {
                warn!(error = %err, "could not clean content, sending it as text");
                encode_text(&request.content).into_owned()
            }
        }
    }
}

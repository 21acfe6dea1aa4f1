//! Default handler for errors that reach the end of the application pipeline.

use std::sync::Arc;

use futures::future::BoxFuture;
use isomorph_core::config::CommonConfig;
use isomorph_core::status::INTERNAL_SERVER_ERROR;
use isomorph_core::{DispatchError, Value};

use crate::context::Context;
use crate::log::access_line;
use crate::pipeline::{ErrorHandler, HandlerResult, Next};
use crate::render::{HeadTags, Page, Renderer, escape_html, snapshot_json};

/// Renders a best-effort 500 page.
///
/// A response that is already finalized is left alone and the error is forwarded.
/// In dev mode the diagnostic goes to a `console.log` script after the page body
/// instead of into the page itself.
#[derive(Clone)]
pub struct DefaultErrorHandler {
    renderer: Arc<dyn Renderer>,
    common: CommonConfig,
    dev: bool,
}

impl DefaultErrorHandler {
    /// Handler rendering through `renderer`.
    #[must_use]
    pub fn new(renderer: Arc<dyn Renderer>, common: CommonConfig, dev: bool) -> Self {
        Self {
            renderer,
            common,
            dev,
        }
    }

    fn page(&self, ctx: &Context, error: &DispatchError) -> Result<Page, DispatchError> {
        let line = access_line(ctx, None).to_string();
        let mut body = format!(
            "<div class=\"isomorph-error\"><div>{}</div></div>",
            escape_html(&line)
        );
        if self.dev {
            let diagnostic = snapshot_json(&Value::String(error.diagnostic()))?;
            body.push_str(&format!("<script>console.log({diagnostic})</script>"));
        }

        Ok(Page {
            head: HeadTags {
                title: format!("{} | {}", error.message(), self.common.site_name),
                description: error.message().to_string(),
                author: self
                    .common
                    .author
                    .clone()
                    .unwrap_or_else(|| self.common.site_name.clone()),
            },
            body,
        })
    }
}

impl std::fmt::Debug for DefaultErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultErrorHandler")
            .field("dev", &self.dev)
            .finish_non_exhaustive()
    }
}

impl ErrorHandler<Context> for DefaultErrorHandler {
    fn call<'a>(
        &'a self,
        error: DispatchError,
        ctx: &'a mut Context,
        next: Next<'a, Context>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if ctx.response().is_sent() {
                tracing::debug!(error = %error, "Response already sent, forwarding error");
                next.fail(ctx, error).await;
                return Ok(());
            }

            ctx.status(INTERNAL_SERVER_ERROR, Some(&error));
            ctx.response_mut().set_error_message(Some(error.to_string()));

            let page = self.page(ctx, &error)?;
            let data = match self.renderer.render(ctx, &page) {
                Ok(data) => data,
                Err(render_error) => {
                    tracing::warn!(error = %render_error, "Error page rendering failed, sending bare body");
                    page.body.clone()
                },
            };
            ctx.extensions_mut().insert(page.head);
            ctx.send(data).await?;

            next.resume(ctx).await;
            Ok(())
        })
    }
}

//! Headless browser capture.
//!
//! [`ScreenshotEngine`] is the seam between the render coordinator and the
//! browser: given a document and a viewport it produces encoded image bytes.
//! [`ChromiumEngine`] is the production implementation — one long-lived
//! Chromium instance shared by all callers, one fresh page per capture.
//! Pages are never shared between captures.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::render::ImageFormat;

/// Fixed encoder quality for JPEG captures.
const JPEG_QUALITY: i64 = 90;

/// Renders an HTML document at a given viewport into image bytes.
#[async_trait]
pub trait ScreenshotEngine: Send + Sync {
    async fn capture(
        &self,
        html: &str,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> Result<Vec<u8>>;

    /// Whether the engine currently holds a live browser connection.
    async fn connected(&self) -> bool;

    async fn close(&self);
}

struct BrowserHandle {
    browser: tokio::sync::Mutex<Browser>,
    event_task: JoinHandle<()>,
}

/// Shared headless Chromium instance.
///
/// The browser is launched lazily on first capture. If the connection is
/// lost (the event task ends), the next capture relaunches it.
#[derive(Default)]
pub struct ChromiumEngine {
    state: RwLock<Option<Arc<BrowserHandle>>>,
}

impl ChromiumEngine {
    pub fn new() -> Self {
        Self::default()
    }

    async fn ensure_browser(&self) -> Result<Arc<BrowserHandle>> {
        {
            let state = self.state.read().await;
            if let Some(handle) = state.as_ref() {
                if !handle.event_task.is_finished() {
                    return Ok(handle.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        // Re-check: another caller may have relaunched while we waited.
        if let Some(handle) = state.as_ref() {
            if !handle.event_task.is_finished() {
                return Ok(handle.clone());
            }
            warn!("Browser connection lost; relaunching");
        } else {
            info!("Launching headless browser");
        }

        let config = BrowserConfig::builder()
            .no_sandbox()
            .build()
            .map_err(|err| anyhow!("Invalid browser configuration: {err}"))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch headless browser")?;

        let event_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            debug!("Browser event stream ended");
        });

        let handle = Arc::new(BrowserHandle {
            browser: tokio::sync::Mutex::new(browser),
            event_task,
        });
        *state = Some(handle.clone());
        Ok(handle)
    }

    async fn capture_on_page(
        page: &Page,
        html: &str,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> Result<Vec<u8>> {
        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(i64::from(width))
                .height(i64::from(height))
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(|err| anyhow!("Invalid viewport parameters: {err}"))?,
        )
        .await
        .context("Failed to set viewport")?;

        page.set_content(html)
            .await
            .context("Failed to load document")?;
        // Wait until the document (including remote assets) settles before
        // capturing.
        page.wait_for_navigation()
            .await
            .context("Document never became idle")?;

        let mut params = ScreenshotParams::builder()
            .format(match format {
                ImageFormat::Png => CaptureScreenshotFormat::Png,
                ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
            })
            .clip(Viewport {
                x: 0.0,
                y: 0.0,
                width: f64::from(width),
                height: f64::from(height),
                scale: 1.0,
            });
        if format == ImageFormat::Jpeg {
            params = params.quality(JPEG_QUALITY);
        }

        page.screenshot(params.build())
            .await
            .context("Screenshot capture failed")
    }
}

#[async_trait]
impl ScreenshotEngine for ChromiumEngine {
    async fn capture(
        &self,
        html: &str,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> Result<Vec<u8>> {
        let handle = self.ensure_browser().await?;
        let page = {
            let browser = handle.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .context("Failed to open browser page")?
        };

        let result = Self::capture_on_page(&page, html, width, height, format).await;

        // Release the page on every exit path.
        if let Err(err) = page.close().await {
            debug!(%err, "Failed to close browser page");
        }
        result
    }

    async fn connected(&self) -> bool {
        let state = self.state.read().await;
        state
            .as_ref()
            .map_or(false, |handle| !handle.event_task.is_finished())
    }

    async fn close(&self) {
        let mut state = self.state.write().await;
        if let Some(handle) = state.take() {
            let mut browser = handle.browser.lock().await;
            if let Err(err) = browser.close().await {
                warn!(%err, "Failed to close browser");
            }
            handle.event_task.abort();
        }
    }
}

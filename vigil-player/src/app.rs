//! Windowed presentation host.
//!
//! Owns the winit window and hands it to the wgpu paint surface. All
//! playback machinery runs on the tokio runtime; the window thread only
//! relays resizes and the close request.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

use vigil_core::clock::SystemClock;
use vigil_core::config::PlayerConfig;
use vigil_core::openh264_decode::SoftwareDecodeService;
use vigil_core::pipeline::{PaintSurface, PipelineEvent, PlayerPipeline};
use vigil_core::render::WgpuSurface;

use crate::net;

pub struct WindowedApp {
    runtime: tokio::runtime::Handle,
    config: PlayerConfig,
    listen: String,
    window: Option<Arc<Window>>,
    surface: Option<Arc<WgpuSurface>>,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl WindowedApp {
    pub fn new(runtime: tokio::runtime::Handle, config: PlayerConfig, listen: String) -> Self {
        Self {
            runtime,
            config,
            listen,
            window: None,
            surface: None,
            events: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title("VIGIL Player")
            .with_inner_size(LogicalSize::new(1280.0, 720.0));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("creating window")?,
        );
        let surface = Arc::new(
            pollster::block_on(WgpuSurface::new(window.clone()))
                .context("creating render surface")?,
        );

        let listener = self
            .runtime
            .block_on(TcpListener::bind(&self.listen))
            .with_context(|| format!("binding {}", self.listen))?;
        tracing::info!(addr = %self.listen, "listening for feeder");

        let service = Arc::new(SoftwareDecodeService::new());
        let clock = Arc::new(SystemClock::new());
        let (host_tx, host_rx) = mpsc::unbounded_channel();

        // Pipeline construction spawns decoder tasks, so it needs the
        // runtime context entered on this thread.
        let events = {
            let _guard = self.runtime.enter();
            let (pipeline, events) = PlayerPipeline::new(
                self.config.clone(),
                service,
                surface.clone() as Arc<dyn PaintSurface>,
                clock,
                host_tx,
            );
            self.runtime.spawn(async move {
                if let Err(e) = pipeline.run().await {
                    tracing::error!(error = %e, "pipeline stopped");
                }
            });
            events
        };
        self.runtime.spawn({
            let events = events.clone();
            async move {
                if let Err(e) = net::serve(listener, events, host_rx).await {
                    tracing::error!(error = %e, "transport failed");
                }
            }
        });

        self.window = Some(window);
        self.surface = Some(surface);
        self.events = Some(events);
        Ok(())
    }
}

impl ApplicationHandler for WindowedApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        // Some platforms deliver resumed more than once; the pipeline is
        // built on the first one only.
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            tracing::error!(error = %e, "startup failed");
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::Resized(size) => {
                if let Some(surface) = &self.surface {
                    surface.window_resized(size.width, size.height);
                }
            }
            WindowEvent::CloseRequested => {
                if let Some(events) = &self.events {
                    let _ = events.send(PipelineEvent::Shutdown);
                }
                event_loop.exit();
            }
            _ => {}
        }
    }
}

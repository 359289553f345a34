// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use vellum_core::init_tracing;
use vellum_geom::{Color, CornerRadii, DrawList};
use vellum_render::{RenderSize, Renderer};
use vellum_render_vk::VkRenderer;

use vellum_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::fs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "vellum.toml")]
    config: String,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct RenderCfg {
    #[serde(default = "default_clear")]
    clear_color: [f32; 4],
    #[serde(default = "default_vsync")]
    vsync: bool,
    #[serde(default)]
    vsync_mode: VsyncMode,
    #[serde(default = "default_msaa")]
    msaa_samples: u32,
}

#[derive(Debug, Clone, Copy, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: true,
            vsync_mode: VsyncMode::Mailbox,
            msaa_samples: default_msaa(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}
fn default_vsync() -> bool {
    true
}
fn default_msaa() -> u32 {
    4
}
fn load_cfg(path: &str) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_default(),
        Err(_) => AppCfg::default(),
    }
}

/// Demo scene: a title bar across the top and a side panel, the kind of
/// chrome a widget layer would issue every frame.
fn build_scene(list: &mut DrawList, size: RenderSize) {
    let w = size.width as f32;
    let panel = Color::from_rgba8(41, 41, 43, 255);
    let accent = Color::from_rgba8(86, 128, 194, 255);

    list.round_rect(10.0, 10.0, w - 20.0, 50.0, CornerRadii::all(5.0), 2, panel);
    list.round_rect(10.0, 70.0, 250.0, 450.0, CornerRadii::all(5.0), 2, panel);
    list.rect(20.0, 90.0, 230.0, 8.0, accent);
}

struct App {
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    list: DrawList,
    render_size: RenderSize,

    cfg: AppCfg,
    exiting: bool,
    frames: u32,
    last_fps_instant: std::time::Instant,

    paused: bool,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window = event_loop
                .create_window(Window::default_attributes().with_title("vellum"))
                .expect("create_window");

            let size = window.inner_size();

            self.render_size = RenderSize {
                width: size.width.max(1),
                height: size.height.max(1),
            };

            let wh = window.window_handle().expect("window_handle");
            let dh = window.display_handle().expect("display_handle");

            let mut renderer = match VkRenderer::new(&wh, &dh, self.render_size) {
                Ok(r) => r,
                Err(e) => {
                    // Setup errors are fatal; nothing to fall back to.
                    error!("vk init failed: {e:#}");
                    event_loop.exit();
                    return;
                }
            };

            renderer.set_clear_color(self.cfg.render.clear_color);
            renderer.set_vsync(self.cfg.render.vsync);
            let mode = match self.cfg.render.vsync_mode {
                VsyncMode::Fifo => vellum_render_vk::VkVsyncMode::Fifo,
                VsyncMode::Mailbox => vellum_render_vk::VkVsyncMode::Mailbox,
            };
            renderer.set_vsync_mode(mode);
            renderer.set_msaa_samples(self.cfg.render.msaa_samples);

            info!("vsync cfg = {}", self.cfg.render.vsync);

            self.window = Some(window);
            self.renderer = Some(renderer);
        }

        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });

        self.paused = self.render_size.width == 0 || self.render_size.height == 0;
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.paused = self.render_size.width == 0 || self.render_size.height == 0;
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );

                if !self.paused {
                    if let Some(renderer) = &mut self.renderer {
                        if let Err(e) = renderer.resize(self.render_size) {
                            error!("resize error: {e:#}");
                        }
                    }
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }

                if let Some(renderer) = &mut self.renderer {
                    // Immediate mode: rebuild the batch from scratch. The
                    // renderer leaves it populated when a stale surface
                    // forces the frame to be retried.
                    self.list.clear();
                    build_scene(&mut self.list, self.render_size);

                    match renderer.render(&mut self.list) {
                        Ok(()) => {
                            // count only frames that were actually rendered
                            self.frames = self.frames.saturating_add(1);
                        }
                        Err(e) => {
                            error!("render error: {e:#}");
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            // window-size=0 → sleep
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        if self.cfg.render.vsync {
            // Vsync: block until events, then redraw once
            event_loop.set_control_flow(ControlFlow::Wait);
        } else {
            // Uncapped: poll and keep drawing
            event_loop.set_control_flow(ControlFlow::Poll);
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = std::time::Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        window: None,
        renderer: None,
        list: DrawList::new(),
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        cfg: load_cfg(&args.config),
        exiting: false,
        frames: 0,
        last_fps_instant: std::time::Instant::now(),
        paused: false,
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert!(cfg.render.vsync);
        assert_eq!(cfg.render.msaa_samples, 4);
        assert_eq!(cfg.render.clear_color, [0.02, 0.02, 0.04, 1.0]);
    }

    #[test]
    fn config_overrides_apply() {
        let cfg: AppCfg = toml::from_str(
            r#"
[render]
vsync = false
vsync_mode = "fifo"
msaa_samples = 1
"#,
        )
        .unwrap();
        assert!(!cfg.render.vsync);
        assert!(matches!(cfg.render.vsync_mode, VsyncMode::Fifo));
        assert_eq!(cfg.render.msaa_samples, 1);
    }
}

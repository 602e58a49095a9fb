//! Voice client window: egui/eframe application.
//!
//! # Architecture
//!
//! [`VoiceClientApp`] is the top-level [`eframe::App`].  It owns no session
//! logic: every frame it copies the latest [`SessionView`] out of the
//! [`SharedView`] published by the dispatcher, renders it, and forwards a
//! click on the single control as [`SessionEvent::UserClick`].  Closing the
//! window forwards [`SessionEvent::Shutdown`] and saves the window position
//! back to the config file.
//!
//! # Control appearance
//!
//! | State | Label | Colour |
//! |-------|-------|--------|
//! | `Idle` | "Conectar" | grey |
//! | `Connecting` | "Conectando..." | grey, disabled |
//! | `Ready` | "Hablar" | green |
//! | `Listening` | "Detener" | red |
//! | `Processing` | "Procesando..." | orange, disabled |
//! | `Speaking` | "Hablando..." | blue |
//! | `Error` | "Reintentar" | dark orange |

use std::sync::PoisonError;
use std::time::Duration;

use eframe::egui;

use crate::config::AppConfig;
use crate::session::{EventSender, SessionEvent, SessionState, SessionView, SharedView};

const REPAINT_INTERVAL: Duration = Duration::from_millis(100);

/// Fill colour of the session control for `state`.
pub fn state_color(state: SessionState) -> egui::Color32 {
    match state {
        SessionState::Idle | SessionState::Connecting => egui::Color32::from_rgb(110, 110, 110),
        SessionState::Ready => egui::Color32::from_rgb(60, 170, 90),
        SessionState::Listening => egui::Color32::from_rgb(210, 55, 55),
        SessionState::Processing => egui::Color32::from_rgb(235, 145, 40),
        SessionState::Speaking => egui::Color32::from_rgb(55, 110, 220),
        SessionState::Error => egui::Color32::from_rgb(190, 90, 20),
    }
}

// ---------------------------------------------------------------------------
// VoiceClientApp
// ---------------------------------------------------------------------------

pub struct VoiceClientApp {
    view: SharedView,
    events: EventSender,
    config: AppConfig,
    /// Set once `Shutdown` has been forwarded.
    closed: bool,
}

impl VoiceClientApp {
    pub fn new(view: SharedView, events: EventSender, config: AppConfig) -> Self {
        Self {
            view,
            events,
            config,
            closed: false,
        }
    }

    fn snapshot(&self) -> SessionView {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn draw_control(&self, ui: &mut egui::Ui, view: &SessionView) {
        let color = if view.disabled {
            egui::Color32::from_rgb(70, 70, 70)
        } else {
            state_color(view.state)
        };

        let button = egui::Button::new(
            egui::RichText::new(view.control_label())
                .color(egui::Color32::WHITE)
                .size(16.0),
        )
        .fill(color)
        .min_size(egui::vec2(ui.available_width(), 40.0));

        let response = ui.add_enabled(view.control_enabled(), button);
        if response.clicked() {
            log::debug!("ui: click in {}", view.state);
            self.events.emit(SessionEvent::UserClick);
        }
    }

    fn draw_transcript(&self, ui: &mut egui::Ui, view: &SessionView) {
        ui.label(
            egui::RichText::new("Texto reconocido:")
                .color(egui::Color32::from_rgb(180, 180, 180))
                .size(12.0),
        );
        match &view.transcript {
            Some(t) => {
                let mut text = egui::RichText::new(t.text.as_str()).size(14.0);
                if !t.is_final {
                    text = text.italics().color(egui::Color32::from_rgb(150, 150, 150));
                }
                ui.label(text);
            }
            None => {
                ui.label(egui::RichText::new("-").color(egui::Color32::from_rgb(90, 90, 90)));
            }
        }
    }

    fn draw_response(&self, ui: &mut egui::Ui, view: &SessionView) {
        ui.label(
            egui::RichText::new("Respuesta del servidor:")
                .color(egui::Color32::from_rgb(180, 180, 180))
                .size(12.0),
        );
        let text = view.response.as_deref().unwrap_or("-");
        ui.label(egui::RichText::new(text).size(14.0));
    }

    fn draw_error(&self, ui: &mut egui::Ui, view: &SessionView) {
        if let Some(message) = &view.error_message {
            ui.add_space(4.0);
            ui.label(
                egui::RichText::new(message.as_str())
                    .color(egui::Color32::from_rgb(255, 136, 68))
                    .size(12.0),
            );
        }
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.events.emit(SessionEvent::Shutdown);
        }
    }

    /// Record where the window is so the next start opens it there.
    fn remember_position(&mut self, pos: egui::Pos2) {
        self.config.ui.window_position = Some((pos.x, pos.y));
    }
}

// ---------------------------------------------------------------------------
// eframe::App impl
// ---------------------------------------------------------------------------

impl eframe::App for VoiceClientApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // The view changes from other threads; poll it.
        ctx.request_repaint_after(REPAINT_INTERVAL);

        if ctx.input(|i| i.viewport().close_requested()) {
            self.shutdown();
        }

        if let Some(rect) = ctx.input(|i| i.viewport().outer_rect) {
            self.remember_position(rect.min);
        }

        let view = self.snapshot();

        let frame = egui::Frame::new()
            .fill(egui::Color32::from_rgb(30, 30, 30))
            .inner_margin(egui::Margin::same(12));

        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            self.draw_control(ui, &view);
            ui.add_space(8.0);
            ui.separator();
            self.draw_transcript(ui, &view);
            ui.add_space(6.0);
            self.draw_response(ui, &view);
            self.draw_error(ui, &view);

            ui.with_layout(egui::Layout::bottom_up(egui::Align::LEFT), |ui| {
                ui.label(
                    egui::RichText::new(format!(
                        "{}:{}  sesión {}  conversación {}",
                        self.config.server.host,
                        self.config.server.port,
                        view.session_id,
                        view.conversation_id
                    ))
                    .color(egui::Color32::from_rgb(100, 100, 100))
                    .size(10.0),
                );
            });
        });
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        log::info!("voice client window closing");
        self.shutdown();
        if let Err(e) = self.config.save() {
            log::warn!("Failed to save config: {e:#}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

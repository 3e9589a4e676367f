use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::error::ClientError;
use crate::presenter::{derive_with_policy, PopupPolicy, RenderModel, ViewState};
use crate::sync::{QuerySynchronizer, ReplyOutcome};
use eframe::egui;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const REPAINT_INTERVAL: Duration = Duration::from_millis(16);
const HIGHLIGHT_COLOR: egui::Color32 = egui::Color32::from_rgb(125, 211, 252);

/// Top-level state for the search window. Owns the single connection and
/// lends it to the synchronizer on every call.
pub struct LiveSearchApp {
    connection: ConnectionManager,
    sync: QuerySynchronizer,
    view: ViewState,
    popup_policy: PopupPolicy,
    notice: String,
    status_line: String,
    focus_query_requested: bool,
}

impl LiveSearchApp {
    pub fn new(connection: ConnectionManager, config: &ClientConfig, query: String) -> Self {
        let mut app = Self {
            connection,
            sync: QuerySynchronizer::new(config.sync_options()),
            view: ViewState {
                input_text: query,
                popup_open: false,
            },
            popup_policy: config.popup_policy,
            notice: String::new(),
            status_line: String::new(),
            focus_query_requested: true,
        };
        app.refresh_status_line();
        app
    }

    fn connection_label(&self) -> &'static str {
        match self.connection.state() {
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Open => "Connected",
            ConnectionState::Closed | ConnectionState::Errored => "Disconnected",
        }
    }

    fn refresh_status_line(&mut self) {
        let pending = if self.sync.next_deadline().is_some() {
            " | Waiting to send..."
        } else {
            ""
        };
        let notice = if self.notice.is_empty() {
            String::new()
        } else {
            format!(" | {}", self.notice)
        };
        self.status_line = format!(
            "{} | Results: {}{}{}",
            self.connection_label(),
            self.sync.results().len(),
            pending,
            notice
        );
    }

    fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = notice.into();
        self.refresh_status_line();
    }

    fn clear_notice(&mut self) {
        self.notice.clear();
        self.refresh_status_line();
    }

    fn report(&mut self, err: ClientError) {
        warn!(error = %err, "live search error");
        self.set_notice(err.to_string());
    }

    fn handle_input_changed(&mut self) {
        match self
            .sync
            .on_input_changed(&mut self.connection, &self.view.input_text)
        {
            Ok(()) => self.refresh_status_line(),
            Err(err) => self.report(err),
        }
    }

    fn handle_focus_changed(&mut self, focused: bool) {
        if focused {
            self.view.on_focus();
        } else {
            self.view.on_blur();
        }
    }

    fn handle_submit(&mut self) {
        if let Err(err) = self.sync.submit(&mut self.connection, &self.view.input_text) {
            self.report(err);
        }
    }

    fn handle_close(&mut self) {
        self.connection.close();
        self.set_notice("Connection closed");
    }

    fn poll_connection(&mut self) {
        for event in self.connection.poll_events() {
            match event {
                ConnectionEvent::StatusChanged(ConnectionState::Open) => {
                    self.clear_notice();
                    if !self.view.input_text.is_empty() {
                        self.handle_input_changed();
                    }
                }
                ConnectionEvent::StatusChanged(ConnectionState::Errored) => {
                    let reason = self
                        .connection
                        .last_error()
                        .unwrap_or("transport failure")
                        .to_string();
                    self.set_notice(reason);
                }
                ConnectionEvent::StatusChanged(_) => self.refresh_status_line(),
                ConnectionEvent::Message(payload) => {
                    let outcome = self.sync.on_message_received(&payload);
                    self.apply_reply(outcome);
                }
                ConnectionEvent::InvalidText(frame) => {
                    let outcome = self.sync.on_frame_received(&frame);
                    self.apply_reply(outcome);
                }
            }
        }
    }

    fn apply_reply(&mut self, outcome: Result<ReplyOutcome, ClientError>) {
        match outcome {
            Ok(ReplyOutcome::Applied { count }) => {
                debug!(count, "results replaced");
                self.clear_notice();
            }
            Ok(ReplyOutcome::Stale { .. }) => {}
            Err(err) => self.report(err),
        }
    }

    /// Held queries only flush while open; the Open transition resends the
    /// current text anyway.
    fn tick(&mut self, now: Instant) {
        if self.connection.state() != ConnectionState::Open {
            return;
        }
        match self.sync.tick(&mut self.connection, now) {
            Ok(true) => self.refresh_status_line(),
            Ok(false) => {}
            Err(err) => self.report(err),
        }
    }

    pub fn render_model(&self) -> RenderModel {
        derive_with_policy(
            &self.view,
            self.sync.results(),
            &self.view.input_text,
            self.popup_policy,
        )
    }

    fn result_label(model: &RenderModel, row: usize) -> egui::text::LayoutJob {
        let mut job = egui::text::LayoutJob::default();
        let Some(row) = model.rows.get(row) else {
            return job;
        };
        for segment in &row.name.segments {
            job.append(
                &segment.text,
                0.0,
                egui::TextFormat {
                    color: if segment.highlighted {
                        egui::Color32::BLACK
                    } else {
                        egui::Color32::from_rgb(229, 231, 235)
                    },
                    background: if segment.highlighted {
                        HIGHLIGHT_COLOR
                    } else {
                        egui::Color32::TRANSPARENT
                    },
                    ..Default::default()
                },
            );
        }
        job
    }
}

impl eframe::App for LiveSearchApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_connection();
        self.tick(Instant::now());
        if !self.connection.state().is_terminal() {
            ctx.request_repaint_after(REPAINT_INTERVAL);
        }

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(format!("{} results", self.sync.results().len()));
                ui.separator();
                ui.label(self.connection_label());
                if ui.button("Submit").clicked() {
                    self.handle_submit();
                }
                let can_close = !self.connection.state().is_terminal();
                if ui
                    .add_enabled(can_close, egui::Button::new("Close"))
                    .clicked()
                {
                    self.handle_close();
                }
            });

            let query_id = ui.make_persistent_id("query-input");
            let output = egui::TextEdit::singleline(&mut self.view.input_text)
                .id(query_id)
                .desired_width(f32::INFINITY)
                .hint_text("Search...")
                .show(ui);
            let response = output.response;
            if self.focus_query_requested {
                response.request_focus();
                self.focus_query_requested = false;
            }
            if response.changed() {
                self.handle_input_changed();
            }
            if response.gained_focus() {
                self.handle_focus_changed(true);
            }
            if response.lost_focus() {
                // A single-line edit drops focus on Enter; treat that as submit
                // and keep the box focused.
                if ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    self.handle_submit();
                    self.focus_query_requested = true;
                } else {
                    self.handle_focus_changed(false);
                }
            }
        });

        egui::TopBottomPanel::bottom("status")
            .resizable(false)
            .exact_height(24.0)
            .show(ctx, |ui| {
                ui.add(egui::Label::new(self.status_line.as_str()).truncate());
            });

        let model = self.render_model();
        egui::CentralPanel::default().show(ctx, |ui| {
            if !model.show_list {
                return;
            }
            egui::ScrollArea::vertical()
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    for (i, row) in model.rows.iter().enumerate() {
                        ui.add(
                            egui::Label::new(Self::result_label(&model, i))
                                .sense(egui::Sense::hover()),
                        )
                        .on_hover_text(row.description.as_str());
                    }
                });
        });
    }
}

impl Drop for LiveSearchApp {
    fn drop(&mut self) {
        self.connection.close();
    }
}

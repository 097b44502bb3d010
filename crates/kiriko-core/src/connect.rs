//! The account-linking flow.
//!
//! A finite-state machine drives the handshake: request a one-time code, poll
//! until the user authorizes it, pick a server, pick library sections, done.
//! `ConnectState::apply` is pure and returns the side effects for the
//! controller to execute, so every transition is testable without timers or
//! a network. In-flight completions carry the generation they were issued
//! under; a cancel bumps the generation and strands them.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use kiriko_api::types::{
    AuthStart, ConnectionStatus, LibrarySection, SectionKind, ServerCandidate, ServerPick,
};
use kiriko_api::Api;

use crate::cache::Caches;

/// Fixed cadence of the authorization poll. There is no client-side timeout:
/// the poll runs until authorized, cancelled, or torn down, and upstream PIN
/// expiry surfaces as poll errors which are treated as transient.
pub const AUTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Section kinds pre-selected when the user has no prior selection.
const PREFERRED_SECTION_KINDS: &[SectionKind] = &[SectionKind::Movie, SectionKind::Show];

/// Where the flow currently is. Each variant carries only the fields valid in
/// that phase, so stale fields cannot be read.
#[derive(Debug, Clone)]
pub enum ConnectPhase {
    Idle,
    Starting,
    AwaitingAuth {
        pin: AuthStart,
        /// The poll came back positive; the server list is being fetched.
        authorized: bool,
    },
    PickingServer {
        servers: Vec<ServerCandidate>,
    },
    Connecting {
        pick: ServerPick,
        /// Kept so a save failure can fall back to the picker.
        servers: Vec<ServerCandidate>,
    },
    PickingLibraries {
        sections: Vec<LibrarySection>,
        selected: BTreeSet<String>,
        saving: bool,
    },
    Connected {
        /// Refreshed via the status cache; `None` briefly after a fresh link.
        status: Option<ConnectionStatus>,
    },
}

#[derive(Debug)]
pub enum ConnectEvent {
    StatusLoaded {
        generation: u64,
        result: Result<ConnectionStatus, String>,
    },
    Start,
    AuthStarted {
        generation: u64,
        result: Result<AuthStart, String>,
    },
    AuthChecked {
        generation: u64,
        result: Result<bool, String>,
    },
    ServersLoaded {
        generation: u64,
        result: Result<Vec<ServerCandidate>, String>,
    },
    ServerPicked(ServerPick),
    ServerSaved {
        generation: u64,
        result: Result<(), String>,
    },
    SectionsLoaded {
        generation: u64,
        result: Result<Vec<LibrarySection>, String>,
    },
    SectionToggled(String),
    SaveSelection,
    SelectionSaved {
        generation: u64,
        result: Result<(), String>,
    },
    ChangeLibraries,
    Cancel,
    Disconnect,
    Disconnected {
        generation: u64,
        result: Result<(), String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectEffect {
    LoadStatus,
    StartAuth,
    ScheduleAuthPoll { pin_id: i64, delay: Duration },
    LoadServers,
    SaveServer(ServerPick),
    LoadSections,
    SaveSelection(Vec<String>),
    /// Fire-and-forget sync kick; failures are swallowed (sync progress is
    /// observed through its own poller).
    StartSyncBestEffort,
    Disconnect,
    InvalidateStatus,
}

#[derive(Debug, Clone)]
pub struct ConnectState {
    pub phase: ConnectPhase,
    /// Most recent user-facing failure, cleared when a new attempt starts.
    pub error: Option<String>,
    generation: u64,
}

impl Default for ConnectState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectState {
    pub fn new() -> Self {
        Self {
            phase: ConnectPhase::Idle,
            error: None,
            generation: 0,
        }
    }

    /// Completions stamped with an older generation are stale and ignored.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn apply(&mut self, event: ConnectEvent) -> Vec<ConnectEffect> {
        match event {
            ConnectEvent::Start => {
                if !matches!(self.phase, ConnectPhase::Idle) {
                    return Vec::new();
                }
                self.error = None;
                self.generation += 1;
                self.phase = ConnectPhase::Starting;
                vec![ConnectEffect::StartAuth]
            }

            ConnectEvent::AuthStarted { generation, result } => {
                if generation != self.generation
                    || !matches!(self.phase, ConnectPhase::Starting)
                {
                    return Vec::new();
                }
                match result {
                    Ok(pin) => {
                        let pin_id = pin.pin_id;
                        self.phase = ConnectPhase::AwaitingAuth {
                            pin,
                            authorized: false,
                        };
                        vec![ConnectEffect::ScheduleAuthPoll {
                            pin_id,
                            delay: AUTH_POLL_INTERVAL,
                        }]
                    }
                    Err(message) => {
                        self.phase = ConnectPhase::Idle;
                        self.error = Some(message);
                        Vec::new()
                    }
                }
            }

            ConnectEvent::AuthChecked { generation, result } => {
                if generation != self.generation {
                    return Vec::new();
                }
                let ConnectPhase::AwaitingAuth { pin, authorized } = &mut self.phase else {
                    return Vec::new();
                };
                if *authorized {
                    return Vec::new();
                }
                let pin_id = pin.pin_id;
                match result {
                    Ok(true) => {
                        *authorized = true;
                        vec![ConnectEffect::LoadServers]
                    }
                    // Not yet. Poll errors are transient (this is also what
                    // upstream PIN expiry looks like): keep polling.
                    Ok(false) | Err(_) => vec![ConnectEffect::ScheduleAuthPoll {
                        pin_id,
                        delay: AUTH_POLL_INTERVAL,
                    }],
                }
            }

            ConnectEvent::ServersLoaded { generation, result } => {
                if generation != self.generation
                    || !matches!(self.phase, ConnectPhase::AwaitingAuth { .. })
                {
                    return Vec::new();
                }
                match result {
                    Ok(servers) => {
                        self.phase = ConnectPhase::PickingServer { servers };
                    }
                    Err(message) => {
                        self.phase = ConnectPhase::Idle;
                        self.error = Some(message);
                    }
                }
                Vec::new()
            }

            ConnectEvent::ServerPicked(pick) => {
                let ConnectPhase::PickingServer { servers } = &mut self.phase else {
                    return Vec::new();
                };
                let servers = std::mem::take(servers);
                self.error = None;
                self.phase = ConnectPhase::Connecting {
                    pick: pick.clone(),
                    servers,
                };
                vec![ConnectEffect::SaveServer(pick)]
            }

            ConnectEvent::ServerSaved { generation, result } => {
                if generation != self.generation {
                    return Vec::new();
                }
                let ConnectPhase::Connecting { servers, .. } = &mut self.phase else {
                    return Vec::new();
                };
                match result {
                    Ok(()) => vec![ConnectEffect::LoadSections, ConnectEffect::InvalidateStatus],
                    Err(message) => {
                        let servers = std::mem::take(servers);
                        self.phase = ConnectPhase::PickingServer { servers };
                        self.error = Some(message);
                        Vec::new()
                    }
                }
            }

            ConnectEvent::SectionsLoaded { generation, result } => {
                if generation != self.generation {
                    return Vec::new();
                }
                let phase = std::mem::replace(&mut self.phase, ConnectPhase::Idle);
                match (phase, result) {
                    (ConnectPhase::Connecting { .. }, Ok(sections))
                    | (ConnectPhase::Connected { .. }, Ok(sections)) => {
                        let selected = default_selection(&sections);
                        self.phase = ConnectPhase::PickingLibraries {
                            sections,
                            selected,
                            saving: false,
                        };
                    }
                    (ConnectPhase::Connecting { servers, .. }, Err(message)) => {
                        self.phase = ConnectPhase::PickingServer { servers };
                        self.error = Some(message);
                    }
                    (ConnectPhase::Connected { status }, Err(message)) => {
                        self.phase = ConnectPhase::Connected { status };
                        self.error = Some(message);
                    }
                    (other, _) => self.phase = other,
                }
                Vec::new()
            }

            ConnectEvent::SectionToggled(key) => {
                if let ConnectPhase::PickingLibraries {
                    selected, saving, ..
                } = &mut self.phase
                {
                    if !*saving {
                        if !selected.remove(&key) {
                            selected.insert(key);
                        }
                    }
                }
                Vec::new()
            }

            ConnectEvent::SaveSelection => {
                let ConnectPhase::PickingLibraries {
                    selected, saving, ..
                } = &mut self.phase
                else {
                    return Vec::new();
                };
                if *saving {
                    return Vec::new();
                }
                *saving = true;
                self.error = None;
                vec![ConnectEffect::SaveSelection(
                    selected.iter().cloned().collect(),
                )]
            }

            ConnectEvent::SelectionSaved { generation, result } => {
                if generation != self.generation {
                    return Vec::new();
                }
                let ConnectPhase::PickingLibraries { saving, .. } = &mut self.phase else {
                    return Vec::new();
                };
                if !*saving {
                    return Vec::new();
                }
                match result {
                    Ok(()) => {
                        self.phase = ConnectPhase::Connected { status: None };
                        vec![
                            ConnectEffect::StartSyncBestEffort,
                            ConnectEffect::InvalidateStatus,
                            ConnectEffect::LoadStatus,
                        ]
                    }
                    Err(message) => {
                        *saving = false;
                        self.error = Some(message);
                        Vec::new()
                    }
                }
            }

            ConnectEvent::ChangeLibraries => {
                if matches!(self.phase, ConnectPhase::Connected { .. }) {
                    vec![ConnectEffect::LoadSections]
                } else {
                    Vec::new()
                }
            }

            ConnectEvent::StatusLoaded { generation, result } => {
                if generation != self.generation {
                    return Vec::new();
                }
                let Ok(status) = result else {
                    // Status is re-read on demand; a failed load keeps
                    // whatever phase we were in.
                    return Vec::new();
                };
                match self.phase {
                    ConnectPhase::Idle if status.connected => {
                        self.phase = ConnectPhase::Connected {
                            status: Some(status),
                        };
                    }
                    ConnectPhase::Connected { .. } => {
                        if status.connected {
                            self.phase = ConnectPhase::Connected {
                                status: Some(status),
                            };
                        } else {
                            self.phase = ConnectPhase::Idle;
                        }
                    }
                    // Mid-flow a "not connected" status is expected; never
                    // yank the phase out from under the user.
                    _ => {}
                }
                Vec::new()
            }

            ConnectEvent::Cancel => match self.phase {
                ConnectPhase::Starting
                | ConnectPhase::AwaitingAuth { .. }
                | ConnectPhase::PickingServer { .. }
                | ConnectPhase::Connecting { .. } => {
                    // Bumping the generation strands the auth poll and any
                    // other in-flight completion, atomically with the reset.
                    self.generation += 1;
                    self.phase = ConnectPhase::Idle;
                    self.error = None;
                    Vec::new()
                }
                _ => Vec::new(),
            },

            ConnectEvent::Disconnect => {
                if matches!(self.phase, ConnectPhase::Connected { .. }) {
                    vec![ConnectEffect::Disconnect]
                } else {
                    Vec::new()
                }
            }

            ConnectEvent::Disconnected { generation, result } => {
                if generation != self.generation
                    || !matches!(self.phase, ConnectPhase::Connected { .. })
                {
                    return Vec::new();
                }
                match result {
                    Ok(()) => {
                        self.generation += 1;
                        self.phase = ConnectPhase::Idle;
                        self.error = None;
                        vec![ConnectEffect::InvalidateStatus]
                    }
                    Err(message) => {
                        self.error = Some(message);
                        Vec::new()
                    }
                }
            }
        }
    }
}

/// Prior selection wins; otherwise pre-select the preferred section kinds.
fn default_selection(sections: &[LibrarySection]) -> BTreeSet<String> {
    let prior: BTreeSet<String> = sections
        .iter()
        .filter(|s| s.selected)
        .map(|s| s.key.clone())
        .collect();
    if !prior.is_empty() {
        return prior;
    }
    sections
        .iter()
        .filter(|s| PREFERRED_SECTION_KINDS.contains(&s.kind))
        .map(|s| s.key.clone())
        .collect()
}

// ── Controller ─────────────────────────────────────────────────────

struct ControllerShared {
    state: Mutex<ConnectState>,
    tx: watch::Sender<ConnectState>,
}

/// Executes the flow's effects against the backend and feeds completions back
/// into the state machine.
pub struct ConnectionController<S: Api + 'static> {
    service: Arc<S>,
    caches: Arc<Caches>,
    shared: Arc<ControllerShared>,
}

impl<S: Api + 'static> Clone for ConnectionController<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            caches: self.caches.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<S: Api + 'static> ConnectionController<S> {
    /// Create the controller and kick off the initial status load, so a
    /// persisted connection lands directly in `Connected`.
    pub fn new(service: Arc<S>, caches: Arc<Caches>) -> Self {
        let state = ConnectState::new();
        let (tx, _) = watch::channel(state.clone());
        let controller = Self {
            service,
            caches,
            shared: Arc::new(ControllerShared {
                state: Mutex::new(state),
                tx,
            }),
        };
        controller.refresh_status();
        controller
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectState> {
        self.shared.tx.subscribe()
    }

    pub fn state(&self) -> ConnectState {
        self.shared.state.lock().expect("connect lock poisoned").clone()
    }

    pub fn start(&self) {
        self.dispatch(ConnectEvent::Start);
    }

    pub fn cancel(&self) {
        self.dispatch(ConnectEvent::Cancel);
    }

    pub fn pick_server(&self, pick: ServerPick) {
        self.dispatch(ConnectEvent::ServerPicked(pick));
    }

    pub fn toggle_section(&self, key: String) {
        self.dispatch(ConnectEvent::SectionToggled(key));
    }

    pub fn save_selection(&self) {
        self.dispatch(ConnectEvent::SaveSelection);
    }

    pub fn change_libraries(&self) {
        self.dispatch(ConnectEvent::ChangeLibraries);
    }

    pub fn disconnect(&self) {
        self.dispatch(ConnectEvent::Disconnect);
    }

    /// Re-read connection status through the cache.
    pub fn refresh_status(&self) {
        let generation = self
            .shared
            .state
            .lock()
            .expect("connect lock poisoned")
            .generation();
        self.run(ConnectEffect::LoadStatus, generation);
    }

    fn dispatch(&self, event: ConnectEvent) {
        let (effects, generation) = {
            let mut state = self.shared.state.lock().expect("connect lock poisoned");
            let effects = state.apply(event);
            self.shared.tx.send_replace(state.clone());
            (effects, state.generation())
        };
        for effect in effects {
            self.run(effect, generation);
        }
    }

    fn run(&self, effect: ConnectEffect, generation: u64) {
        let controller = self.clone();
        match effect {
            ConnectEffect::LoadStatus => {
                tokio::spawn(async move {
                    let service = controller.service.clone();
                    let result = controller
                        .caches
                        .connection
                        .get_or_fetch(|| async move { service.connection_status().await })
                        .await
                        .map_err(|e| e.to_string());
                    controller.dispatch(ConnectEvent::StatusLoaded { generation, result });
                });
            }
            ConnectEffect::StartAuth => {
                tokio::spawn(async move {
                    let result = controller
                        .service
                        .start_auth()
                        .await
                        .map_err(|e| e.to_string());
                    controller.dispatch(ConnectEvent::AuthStarted { generation, result });
                });
            }
            ConnectEffect::ScheduleAuthPoll { pin_id, delay } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let result = controller
                        .service
                        .poll_auth(pin_id)
                        .await
                        .map_err(|e| e.to_string());
                    controller.dispatch(ConnectEvent::AuthChecked { generation, result });
                });
            }
            ConnectEffect::LoadServers => {
                tokio::spawn(async move {
                    let result = controller
                        .service
                        .list_servers()
                        .await
                        .map_err(|e| e.to_string());
                    controller.dispatch(ConnectEvent::ServersLoaded { generation, result });
                });
            }
            ConnectEffect::SaveServer(pick) => {
                tokio::spawn(async move {
                    let result = controller
                        .service
                        .select_server(pick)
                        .await
                        .map_err(|e| e.to_string());
                    controller.dispatch(ConnectEvent::ServerSaved { generation, result });
                });
            }
            ConnectEffect::LoadSections => {
                tokio::spawn(async move {
                    let result = controller
                        .service
                        .list_libraries()
                        .await
                        .map_err(|e| e.to_string());
                    controller.dispatch(ConnectEvent::SectionsLoaded { generation, result });
                });
            }
            ConnectEffect::SaveSelection(keys) => {
                tokio::spawn(async move {
                    let result = controller
                        .service
                        .save_library_selection(keys)
                        .await
                        .map_err(|e| e.to_string());
                    controller.dispatch(ConnectEvent::SelectionSaved { generation, result });
                });
            }
            ConnectEffect::StartSyncBestEffort => {
                tokio::spawn(async move {
                    if let Err(e) = controller.service.start_sync().await {
                        tracing::debug!(error = %e, "post-save sync kick failed; ignoring");
                    }
                });
            }
            ConnectEffect::Disconnect => {
                tokio::spawn(async move {
                    let result = controller
                        .service
                        .disconnect()
                        .await
                        .map_err(|e| e.to_string());
                    controller.dispatch(ConnectEvent::Disconnected { generation, result });
                });
            }
            ConnectEffect::InvalidateStatus => self.caches.connection.invalidate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeApi;
    use kiriko_api::types::{Account, PathPrefix, ServerInfo, SyncStatus};
    use std::collections::VecDeque;
    use tokio::time::sleep;

    fn pin() -> AuthStart {
        AuthStart {
            pin_id: 11,
            pin_code: "ABCD".into(),
            auth_url: "https://example.test/auth#ABCD".into(),
            expires_at: None,
        }
    }

    fn server(name: &str) -> ServerCandidate {
        ServerCandidate {
            name: name.into(),
            machine_id: format!("machine-{name}"),
            owned: true,
            best_url: format!("https://{name}.local:32400"),
            connections: Vec::new(),
        }
    }

    fn pick(name: &str) -> ServerPick {
        ServerPick {
            name: name.into(),
            machine_id: format!("machine-{name}"),
            url: format!("https://{name}.local:32400"),
        }
    }

    fn section(key: &str, kind: SectionKind, selected: bool) -> LibrarySection {
        LibrarySection {
            key: key.into(),
            title: key.to_uppercase(),
            kind,
            selected,
        }
    }

    fn connected_status() -> ConnectionStatus {
        ConnectionStatus {
            connected: true,
            account: Account::default(),
            server: ServerInfo::default(),
            path_prefix: PathPrefix::default(),
            sync: SyncStatus::default(),
            library_keys: vec!["1".into()],
        }
    }

    #[test]
    fn full_handshake_reaches_picking_server_with_one_server_fetch() {
        let mut state = ConnectState::new();

        let effects = state.apply(ConnectEvent::Start);
        assert_eq!(effects, vec![ConnectEffect::StartAuth]);
        let generation = state.generation();

        let effects = state.apply(ConnectEvent::AuthStarted {
            generation,
            result: Ok(pin()),
        });
        assert!(matches!(
            effects.as_slice(),
            [ConnectEffect::ScheduleAuthPoll { pin_id: 11, .. }]
        ));

        // Two negative polls keep the 2-second cadence going.
        for _ in 0..2 {
            let effects = state.apply(ConnectEvent::AuthChecked {
                generation,
                result: Ok(false),
            });
            assert!(matches!(
                effects.as_slice(),
                [ConnectEffect::ScheduleAuthPoll { .. }]
            ));
        }

        // Third poll authorizes: stop polling, fetch servers exactly once.
        let effects = state.apply(ConnectEvent::AuthChecked {
            generation,
            result: Ok(true),
        });
        assert_eq!(effects, vec![ConnectEffect::LoadServers]);

        let effects = state.apply(ConnectEvent::ServersLoaded {
            generation,
            result: Ok(vec![server("nas")]),
        });
        assert!(effects.is_empty());
        assert!(matches!(state.phase, ConnectPhase::PickingServer { .. }));
    }

    #[test]
    fn cancel_in_awaiting_auth_strands_the_poll() {
        let mut state = ConnectState::new();
        state.apply(ConnectEvent::Start);
        let generation = state.generation();
        state.apply(ConnectEvent::AuthStarted {
            generation,
            result: Ok(pin()),
        });

        assert!(state.apply(ConnectEvent::Cancel).is_empty());
        assert!(matches!(state.phase, ConnectPhase::Idle));
        assert!(state.error.is_none());

        // The in-flight poll lands with the old generation: no reschedule, no
        // phase change.
        let effects = state.apply(ConnectEvent::AuthChecked {
            generation,
            result: Ok(true),
        });
        assert!(effects.is_empty());
        assert!(matches!(state.phase, ConnectPhase::Idle));
    }

    #[test]
    fn poll_errors_keep_polling() {
        let mut state = ConnectState::new();
        state.apply(ConnectEvent::Start);
        let generation = state.generation();
        state.apply(ConnectEvent::AuthStarted {
            generation,
            result: Ok(pin()),
        });

        let effects = state.apply(ConnectEvent::AuthChecked {
            generation,
            result: Err("pin expired upstream".into()),
        });
        assert!(matches!(
            effects.as_slice(),
            [ConnectEffect::ScheduleAuthPoll { .. }]
        ));
        assert!(matches!(state.phase, ConnectPhase::AwaitingAuth { .. }));
    }

    #[test]
    fn start_auth_failure_returns_to_idle_with_error() {
        let mut state = ConnectState::new();
        state.apply(ConnectEvent::Start);
        let generation = state.generation();
        let effects = state.apply(ConnectEvent::AuthStarted {
            generation,
            result: Err("plex.tv unreachable".into()),
        });
        assert!(effects.is_empty());
        assert!(matches!(state.phase, ConnectPhase::Idle));
        assert_eq!(state.error.as_deref(), Some("plex.tv unreachable"));
    }

    #[test]
    fn save_failure_falls_back_to_server_picker() {
        let mut state = ConnectState::new();
        state.apply(ConnectEvent::Start);
        let generation = state.generation();
        state.apply(ConnectEvent::AuthStarted {
            generation,
            result: Ok(pin()),
        });
        state.apply(ConnectEvent::AuthChecked {
            generation,
            result: Ok(true),
        });
        state.apply(ConnectEvent::ServersLoaded {
            generation,
            result: Ok(vec![server("nas"), server("closet")]),
        });

        let effects = state.apply(ConnectEvent::ServerPicked(pick("nas")));
        assert_eq!(effects, vec![ConnectEffect::SaveServer(pick("nas"))]);

        let effects = state.apply(ConnectEvent::ServerSaved {
            generation,
            result: Err("cannot reach server".into()),
        });
        assert!(effects.is_empty());
        let ConnectPhase::PickingServer { servers } = &state.phase else {
            panic!("expected fallback to the picker");
        };
        assert_eq!(servers.len(), 2);
        assert_eq!(state.error.as_deref(), Some("cannot reach server"));
    }

    #[test]
    fn selection_defaults_prefer_movie_and_show_kinds() {
        let sections = vec![
            section("1", SectionKind::Movie, false),
            section("2", SectionKind::Show, false),
            section("3", SectionKind::Photo, false),
        ];
        let selected = default_selection(&sections);
        assert_eq!(selected, BTreeSet::from(["1".to_string(), "2".to_string()]));
    }

    #[test]
    fn selection_defaults_restore_prior_selection() {
        let sections = vec![
            section("1", SectionKind::Movie, false),
            section("3", SectionKind::Photo, true),
        ];
        let selected = default_selection(&sections);
        assert_eq!(selected, BTreeSet::from(["3".to_string()]));
    }

    #[test]
    fn saving_selection_connects_and_kicks_sync() {
        let mut state = ConnectState::new();
        state.apply(ConnectEvent::Start);
        let generation = state.generation();
        state.apply(ConnectEvent::AuthStarted {
            generation,
            result: Ok(pin()),
        });
        state.apply(ConnectEvent::AuthChecked {
            generation,
            result: Ok(true),
        });
        state.apply(ConnectEvent::ServersLoaded {
            generation,
            result: Ok(vec![server("nas")]),
        });
        state.apply(ConnectEvent::ServerPicked(pick("nas")));
        state.apply(ConnectEvent::ServerSaved {
            generation,
            result: Ok(()),
        });
        state.apply(ConnectEvent::SectionsLoaded {
            generation,
            result: Ok(vec![
                section("1", SectionKind::Movie, false),
                section("2", SectionKind::Show, false),
            ]),
        });
        state.apply(ConnectEvent::SectionToggled("2".into()));

        let effects = state.apply(ConnectEvent::SaveSelection);
        assert_eq!(
            effects,
            vec![ConnectEffect::SaveSelection(vec!["1".into()])]
        );

        let effects = state.apply(ConnectEvent::SelectionSaved {
            generation,
            result: Ok(()),
        });
        assert!(matches!(state.phase, ConnectPhase::Connected { .. }));
        assert_eq!(
            effects,
            vec![
                ConnectEffect::StartSyncBestEffort,
                ConnectEffect::InvalidateStatus,
                ConnectEffect::LoadStatus,
            ]
        );
    }

    #[test]
    fn change_selection_revisits_the_library_picker() {
        let mut state = ConnectState::new();
        state.apply(ConnectEvent::StatusLoaded {
            generation: state.generation(),
            result: Ok(connected_status()),
        });
        let generation = state.generation();

        let effects = state.apply(ConnectEvent::ChangeLibraries);
        assert_eq!(effects, vec![ConnectEffect::LoadSections]);
        assert!(matches!(state.phase, ConnectPhase::Connected { .. }));

        state.apply(ConnectEvent::SectionsLoaded {
            generation,
            result: Ok(vec![
                section("1", SectionKind::Movie, true),
                section("2", SectionKind::Show, false),
            ]),
        });
        let ConnectPhase::PickingLibraries { selected, .. } = &state.phase else {
            panic!("expected the library picker");
        };
        // Prior selection restored, not the preferred-kind default.
        assert_eq!(*selected, BTreeSet::from(["1".to_string()]));
    }

    #[test]
    fn persisted_credentials_enter_connected_directly() {
        let mut state = ConnectState::new();
        let effects = state.apply(ConnectEvent::StatusLoaded {
            generation: state.generation(),
            result: Ok(connected_status()),
        });
        assert!(effects.is_empty());
        assert!(matches!(state.phase, ConnectPhase::Connected { .. }));
    }

    #[test]
    fn status_never_yanks_a_flow_in_progress() {
        let mut state = ConnectState::new();
        state.apply(ConnectEvent::Start);
        let generation = state.generation();
        state.apply(ConnectEvent::AuthStarted {
            generation,
            result: Ok(pin()),
        });

        let mut disconnected = connected_status();
        disconnected.connected = false;
        state.apply(ConnectEvent::StatusLoaded {
            generation,
            result: Ok(disconnected),
        });
        assert!(matches!(state.phase, ConnectPhase::AwaitingAuth { .. }));
    }

    #[test]
    fn disconnect_round_trip() {
        let mut state = ConnectState::new();
        state.apply(ConnectEvent::StatusLoaded {
            generation: state.generation(),
            result: Ok(connected_status()),
        });
        let generation = state.generation();

        let effects = state.apply(ConnectEvent::Disconnect);
        assert_eq!(effects, vec![ConnectEffect::Disconnect]);

        let effects = state.apply(ConnectEvent::Disconnected {
            generation,
            result: Ok(()),
        });
        assert_eq!(effects, vec![ConnectEffect::InvalidateStatus]);
        assert!(matches!(state.phase, ConnectPhase::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn controller_runs_the_auth_poll_at_two_second_cadence() {
        let api = Arc::new(FakeApi::new());
        *api.auth_start.lock().unwrap() = Some(pin());
        *api.auth_polls.lock().unwrap() = VecDeque::from([false, false, true]);
        api.servers.lock().unwrap().push(server("nas"));
        api.fail_endpoint("connection_status");

        let controller = ConnectionController::new(api.clone(), Arc::new(Caches::new()));
        controller.start();

        // Three polls at 2 s apart, then one server fetch.
        sleep(Duration::from_secs(7)).await;
        assert_eq!(api.calls_to("poll_auth"), 3);
        assert_eq!(api.calls_to("list_servers"), 1);
        assert!(matches!(
            controller.state().phase,
            ConnectPhase::PickingServer { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn controller_cancel_stops_the_poll_immediately() {
        let api = Arc::new(FakeApi::new());
        *api.auth_start.lock().unwrap() = Some(pin());
        *api.auth_polls.lock().unwrap() = VecDeque::from([false]);
        api.fail_endpoint("connection_status");

        let controller = ConnectionController::new(api.clone(), Arc::new(Caches::new()));
        controller.start();

        sleep(Duration::from_secs(5)).await;
        let polled = api.calls_to("poll_auth");
        assert!(polled >= 2);

        controller.cancel();
        assert!(matches!(controller.state().phase, ConnectPhase::Idle));

        // One in-flight poll may still land; nothing new is scheduled.
        sleep(Duration::from_secs(10)).await;
        assert!(api.calls_to("poll_auth") <= polled + 1);
        assert!(matches!(controller.state().phase, ConnectPhase::Idle));
    }
}

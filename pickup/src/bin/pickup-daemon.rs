// pickup-daemon: background process editor plugins and the CLI talk to
//
// Responsibilities:
// - Own one editor session (AppContext) per attached plugin connection
// - Keep per-workspace history stores over the on-disk state regions
// - Cache symbol trees pushed by plugins; read repository state via git
// - Expose the Unix socket protocol and broadcast saves/settings changes
// - Flush every editor session on shutdown

use anyhow::{Context, Result};
use pickup_lib::{
    app::{AppContext, AppEvent, CaptureOutcome},
    context::{
        capture::{BufferSource, CaptureService, RepoInfoSource, SymbolSource},
        git::GitRepoInfo,
        history::HistoryStore,
        store::{KeyValueStore, StateStore},
        symbols::SymbolCache,
    },
    daemon::{
        config::Config,
        protocol::{
            deserialize_message, serialize_message, DaemonErrorCode, DaemonNotification,
            DaemonRequest, DaemonResponse, MAX_REQUEST_FRAME_SIZE, PROTOCOL_VERSION,
        },
        settings::{Settings, SettingsPatch},
    },
    error::{HistoryError, NavigationError},
    logging::setup_tracing,
    present,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal;
use tokio::sync::{broadcast, Mutex, RwLock};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 100;

/// Daemon state shared across all client connections
struct DaemonState {
    config: Config,
    settings: RwLock<Settings>,
    state_store: StateStore,
    /// Region shared by every workspace (resume prompt bookkeeping)
    global: Arc<dyn KeyValueStore>,
    /// History per region name
    histories: Mutex<HashMap<String, Arc<HistoryStore>>>,
    symbols: Arc<SymbolCache>,
    repo: Arc<GitRepoInfo>,
    /// Broadcast channel for push notifications
    updates_tx: broadcast::Sender<DaemonNotification>,
    /// Attached editor sessions by connection id
    sessions: Mutex<HashMap<u64, Arc<AppContext>>>,
    next_connection_id: AtomicU64,
}

/// Per-connection protocol state
struct Connection {
    id: u64,
    handshaken: bool,
    session: Option<Arc<AppContext>>,
}

impl DaemonState {
    fn new(config: Config, settings: Settings) -> Self {
        let state_store = StateStore::new(config.state_dir());
        let global: Arc<dyn KeyValueStore> = Arc::new(state_store.global_region());
        let (updates_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        Self {
            config,
            settings: RwLock::new(settings),
            state_store,
            global,
            histories: Mutex::new(HashMap::new()),
            symbols: Arc::new(SymbolCache::new()),
            repo: Arc::new(GitRepoInfo::new()),
            updates_tx,
            sessions: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    fn new_connection(&self) -> Connection {
        Connection {
            id: self.next_connection_id.fetch_add(1, Ordering::SeqCst),
            handshaken: false,
            session: None,
        }
    }

    /// History store for `workspace`, created on first use
    async fn history_for(&self, workspace: Option<&str>) -> Arc<HistoryStore> {
        let region = StateStore::region_name(workspace);
        let mut histories = self.histories.lock().await;
        if let Some(history) = histories.get(&region) {
            return Arc::clone(history);
        }

        let max_history_size = self.settings.read().await.max_history_size;
        let history = Arc::new(HistoryStore::new(
            Arc::new(self.state_store.workspace_region(workspace)),
            Arc::clone(&self.global),
            max_history_size,
        ));
        histories.insert(region, Arc::clone(&history));
        history
    }

    /// Workspace a query applies to: explicit, else the attached session's
    fn query_workspace(conn: &Connection, explicit: Option<String>) -> Option<String> {
        explicit.or_else(|| {
            conn.session
                .as_ref()
                .and_then(|app| app.workspace_folder().map(str::to_string))
        })
    }

    async fn attach(
        &self,
        conn: &mut Connection,
        workspace_folder: Option<String>,
    ) -> DaemonResponse {
        if conn.session.is_some() {
            return DaemonResponse::error(
                DaemonErrorCode::InvalidRequest,
                "an editor session is already attached to this connection",
            );
        }

        let settings = self.settings.read().await.clone();
        let history = self.history_for(workspace_folder.as_deref()).await;
        let symbols: Arc<dyn SymbolSource> = self.symbols.clone();
        let buffers: Arc<dyn BufferSource> = self.symbols.clone();
        let repo: Arc<dyn RepoInfoSource> = self.repo.clone();
        let capture = CaptureService::new(Some(symbols), Some(repo)).with_buffers(buffers);

        let app = Arc::new(AppContext::new(
            workspace_folder.clone(),
            &settings,
            capture,
            history,
        ));
        app.start();

        // ends once the session is dropped and its buffered events are sent
        let mut events = app.subscribe();
        let updates_tx = self.updates_tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AppEvent::ContextSaved { context, reason }) => {
                        let message = present::saved_message(&context);
                        // no subscribers is fine
                        let _ = updates_tx.send(DaemonNotification::ContextSaved {
                            context,
                            reason,
                            message,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.sessions.lock().await.insert(conn.id, Arc::clone(&app));
        conn.session = Some(app);

        let region = StateStore::region_name(workspace_folder.as_deref());
        tracing::info!(connection = conn.id, %region, "editor session attached");
        DaemonResponse::Attached {
            workspace_folder,
            region,
        }
    }

    /// Flush and release the connection's editor session, if any
    async fn detach(&self, conn: &mut Connection) -> Option<Result<Option<CaptureOutcome>, HistoryError>> {
        let app = conn.session.take()?;
        self.sessions.lock().await.remove(&conn.id);

        let result = app.shutdown().await;
        self.symbols.forget_owner(conn.id);

        tracing::info!(connection = conn.id, "editor session detached");
        Some(result)
    }

    /// Flush every attached editor session
    async fn flush_sessions(&self) {
        let sessions: Vec<(u64, Arc<AppContext>)> = self.sessions.lock().await.drain().collect();
        for (id, app) in sessions {
            if let Err(e) = app.shutdown().await {
                tracing::warn!(connection = id, error = %e, "failed to flush editor session");
            }
        }
    }

    /// Push settings into live components and notify clients
    async fn settings_changed(&self, settings: Settings) {
        for app in self.sessions.lock().await.values() {
            app.apply_settings(&settings);
        }
        for history in self.histories.lock().await.values() {
            history.set_max_history_size(settings.max_history_size);
        }
        let _ = self
            .updates_tx
            .send(DaemonNotification::SettingsChanged { settings });
    }

    async fn update_settings(&self, patch: SettingsPatch) -> DaemonResponse {
        let settings = {
            let mut current = self.settings.write().await;
            let mut updated = current.clone();
            patch.apply(&mut updated);

            // nothing changes unless the file was written
            if let Err(e) = updated.save(&self.config.settings_file()) {
                tracing::warn!(error = %format!("{:#}", e), "failed to persist settings");
                return DaemonResponse::error(
                    DaemonErrorCode::Internal,
                    format!("failed to save settings: {:#}", e),
                );
            }
            *current = updated.clone();
            updated
        };
        self.settings_changed(settings.clone()).await;
        DaemonResponse::Settings { settings }
    }

    async fn reload_settings(&self) -> DaemonResponse {
        let settings = match Settings::load_or_init(&self.config.settings_file()) {
            Ok(s) => s,
            Err(e) => {
                return DaemonResponse::error(
                    DaemonErrorCode::InvalidInput,
                    format!("failed to reload settings: {:#}", e),
                )
            }
        };

        *self.settings.write().await = settings.clone();
        self.settings_changed(settings.clone()).await;
        tracing::info!("settings reloaded");
        DaemonResponse::Settings { settings }
    }
}

fn history_error(e: HistoryError) -> DaemonResponse {
    match e {
        HistoryError::InvalidImport(message) => {
            DaemonResponse::error(DaemonErrorCode::InvalidInput, format!("invalid import data: {}", message))
        }
        HistoryError::Persistence(source) => {
            tracing::warn!(error = %source, "history persistence failed");
            DaemonResponse::error(DaemonErrorCode::StoreUnavailable, source.to_string())
        }
    }
}

fn navigation_error(e: NavigationError) -> DaemonResponse {
    match e {
        NavigationError::FileMissing(path) => {
            DaemonResponse::error(DaemonErrorCode::FileMissing, format!("file not found: {}", path))
        }
        NavigationError::NoSuchEntry(index) => DaemonResponse::error(
            DaemonErrorCode::NotFound,
            format!("no saved context at index {}", index),
        ),
        NavigationError::History(e) => history_error(e),
    }
}

fn capture_response(result: Result<Option<CaptureOutcome>, HistoryError>) -> DaemonResponse {
    match result {
        Ok(Some(outcome)) => DaemonResponse::Capture { outcome },
        Ok(None) => DaemonResponse::Ack,
        Err(e) => history_error(e),
    }
}

fn not_attached() -> DaemonResponse {
    DaemonResponse::error(
        DaemonErrorCode::InvalidRequest,
        "no editor session attached; send attach first",
    )
}

/// Handle a single client connection
async fn handle_client(
    state: Arc<DaemonState>,
    mut stream: UnixStream,
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut conn = state.new_connection();

    // Subscribe to updates for this client
    let mut updates_rx = state.updates_tx.subscribe();

    let result: Result<()> = async {
        loop {
            tokio::select! {
                result = reader.read_line(&mut line) => {
                    match result {
                        Ok(0) => break,
                        Ok(_) => {
                            let response = if line.len() > MAX_REQUEST_FRAME_SIZE {
                                DaemonResponse::error(
                                    DaemonErrorCode::InvalidRequest,
                                    format!(
                                        "request frame too large: {} bytes (max {})",
                                        line.len(),
                                        MAX_REQUEST_FRAME_SIZE
                                    ),
                                )
                            } else {
                                match deserialize_message::<DaemonRequest>(line.as_bytes()) {
                                    Ok(request) => {
                                        handle_request(&state, &mut conn, request, &shutdown_tx).await
                                    }
                                    Err(e) => DaemonResponse::error(
                                        DaemonErrorCode::InvalidRequest,
                                        format!("failed to parse request: {}", e),
                                    ),
                                }
                            };

                            let bytes = serialize_message(&response)?;
                            writer.write_all(&bytes).await?;
                            writer.flush().await?;

                            line.clear();
                        }
                        Err(e) => {
                            tracing::debug!(connection = conn.id, error = %e, "error reading from client");
                            break;
                        }
                    }
                }

                // Forward broadcast updates to client
                result = updates_rx.recv() => {
                    match result {
                        Ok(notification) => {
                            if !conn.handshaken {
                                continue;
                            }
                            let bytes = serialize_message(&notification)?;
                            if writer.write_all(&bytes).await.is_err() {
                                break;
                            }
                            let _ = writer.flush().await;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    // a dropped editor connection still gets its last position saved
    if let Some(Err(e)) = state.detach(&mut conn).await {
        tracing::warn!(connection = conn.id, error = %e, "failed to flush editor session on disconnect");
    }
    state.symbols.forget_owner(conn.id);

    result
}

/// Handle a single request from a client
async fn handle_request(
    state: &Arc<DaemonState>,
    conn: &mut Connection,
    request: DaemonRequest,
    shutdown_tx: &tokio::sync::mpsc::Sender<()>,
) -> DaemonResponse {
    if !conn.handshaken && !matches!(request, DaemonRequest::Handshake { .. }) {
        return DaemonResponse::error(
            DaemonErrorCode::InvalidRequest,
            "handshake required before any other request",
        );
    }

    match request {
        DaemonRequest::Handshake { client_version } => {
            if client_version != PROTOCOL_VERSION {
                let message = if client_version < PROTOCOL_VERSION {
                    "daemon is newer than the client; please update the client"
                } else {
                    "daemon is outdated; please restart it"
                };
                return DaemonResponse::error(DaemonErrorCode::VersionMismatch, message);
            }
            conn.handshaken = true;
            DaemonResponse::Handshake {
                protocol_version: PROTOCOL_VERSION,
            }
        }

        DaemonRequest::Ping => DaemonResponse::Pong,

        DaemonRequest::Shutdown => {
            // Signal main loop to shut down
            let _ = shutdown_tx.send(()).await;
            DaemonResponse::ShuttingDown
        }

        DaemonRequest::Attach { workspace_folder } => state.attach(conn, workspace_folder).await,

        DaemonRequest::Activity {
            file_path,
            line,
            column,
        } => match &conn.session {
            Some(app) => {
                app.record_activity(&file_path, line, column);
                DaemonResponse::Ack
            }
            None => not_attached(),
        },

        DaemonRequest::FocusChanged {
            file_path,
            line,
            column,
        } => match &conn.session {
            Some(app) => {
                capture_response(app.focus_changed(&file_path, line, column).await)
            }
            None => not_attached(),
        },

        DaemonRequest::DocumentEdited { file_path } => match &conn.session {
            Some(app) => {
                app.document_edited(&file_path);
                DaemonResponse::Ack
            }
            None => not_attached(),
        },

        DaemonRequest::WindowState { focused } => match &conn.session {
            Some(app) => capture_response(app.window_state(focused).await),
            None => not_attached(),
        },

        DaemonRequest::Symbols {
            file_path,
            symbols,
            text,
        } => {
            state.symbols.update(conn.id, file_path, symbols, text);
            DaemonResponse::Ack
        }

        DaemonRequest::SaveNow => match &conn.session {
            Some(app) => capture_response(app.save_now().await.map(Some)),
            None => not_attached(),
        },

        DaemonRequest::Detach => match state.detach(conn).await {
            Some(Ok(_)) => DaemonResponse::Detached,
            Some(Err(e)) => history_error(e),
            None => not_attached(),
        },

        DaemonRequest::Latest { workspace_folder } => {
            let workspace = DaemonState::query_workspace(conn, workspace_folder);
            let history = state.history_for(workspace.as_deref()).await;
            match history.last_context() {
                Ok(context) => {
                    let now = history.clock().now_millis();
                    let status = context.as_ref().map(|c| present::status_text(c, now));
                    DaemonResponse::Context { context, status }
                }
                Err(e) => history_error(e),
            }
        }

        DaemonRequest::History { workspace_folder } => {
            let workspace = DaemonState::query_workspace(conn, workspace_folder);
            let history = state.history_for(workspace.as_deref()).await;
            match history.history() {
                Ok(contexts) => {
                    let items = present::history_items(&contexts, history.clock().now_millis());
                    DaemonResponse::History { contexts, items }
                }
                Err(e) => history_error(e),
            }
        }

        DaemonRequest::ClearHistory { workspace_folder } => {
            let workspace = DaemonState::query_workspace(conn, workspace_folder);
            let history = state.history_for(workspace.as_deref()).await;
            match history.clear_history() {
                Ok(()) => DaemonResponse::Cleared,
                Err(e) => history_error(e),
            }
        }

        DaemonRequest::Prune {
            workspace_folder,
            max_age_days,
        } => {
            let workspace = DaemonState::query_workspace(conn, workspace_folder);
            let history = state.history_for(workspace.as_deref()).await;
            match history.prune_old_contexts(max_age_days) {
                Ok(removed) => DaemonResponse::Pruned { removed },
                Err(e) => history_error(e),
            }
        }

        DaemonRequest::Export { workspace_folder } => {
            let workspace = DaemonState::query_workspace(conn, workspace_folder);
            let history = state.history_for(workspace.as_deref()).await;
            match history.export_history() {
                Ok(data) => DaemonResponse::Exported { data },
                Err(e) => history_error(e),
            }
        }

        DaemonRequest::Import {
            workspace_folder,
            data,
        } => {
            let workspace = DaemonState::query_workspace(conn, workspace_folder);
            let history = state.history_for(workspace.as_deref()).await;
            match history.import_history(&data) {
                Ok(count) => DaemonResponse::Imported { count },
                Err(e) => history_error(e),
            }
        }

        DaemonRequest::ResolveJump {
            workspace_folder,
            index,
        } => {
            let workspace = DaemonState::query_workspace(conn, workspace_folder);
            let history = state.history_for(workspace.as_deref()).await;
            match present::resolve_jump(&history, index).await {
                Ok(target) => DaemonResponse::JumpTarget { target },
                Err(e) => navigation_error(e),
            }
        }

        DaemonRequest::ResumePrompt {
            workspace_folder,
            force,
        } => {
            let workspace = DaemonState::query_workspace(conn, workspace_folder);
            let history = state.history_for(workspace.as_deref()).await;
            let enabled = state.settings.read().await.auto_show_resume_popup;
            match present::resume_prompt(&history, enabled, force).await {
                Ok(prompt) => DaemonResponse::ResumePrompt { prompt },
                Err(e) => navigation_error(e),
            }
        }

        DaemonRequest::GetSettings => DaemonResponse::Settings {
            settings: state.settings.read().await.clone(),
        },

        DaemonRequest::UpdateSettings { patch } => state.update_settings(patch).await,

        DaemonRequest::ReloadSettings => state.reload_settings().await,
    }
}

fn load_settings(config: &Config) -> Settings {
    match Settings::load_or_init(&config.settings_file()) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "using default settings");
            Settings::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let config = Config::from_env();

    config
        .ensure_dirs()
        .context("Failed to create data directory")?;

    // Clean up stale socket if exists
    if config.socket_exists() {
        if config.is_daemon_running() {
            tracing::error!(pid = ?config.read_pid(), "daemon already running");
            std::process::exit(1);
        }
        config
            .remove_socket()
            .context("Failed to remove stale socket")?;
    }

    config.write_pid().context("Failed to write PID file")?;

    let settings = load_settings(&config);
    let state = Arc::new(DaemonState::new(config.clone(), settings));

    if state.state_store.is_available() {
        match state.state_store.cleanup_stale_temps() {
            Ok((deleted, scanned, hit_limit)) if deleted > 0 || hit_limit => {
                tracing::info!(deleted, scanned, hit_limit, "cleaned up stale temp files");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "temp file cleanup failed"),
        }
    } else {
        tracing::warn!(
            dir = %state.state_store.regions_dir().display(),
            "state store unavailable; history requests will fail"
        );
    }

    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("Failed to bind socket: {}", config.socket_path.display()))?;

    // Secure socket permissions (owner-only access)
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!(
                    "Failed to set socket permissions: {}",
                    config.socket_path.display()
                )
            })?;
    }

    tracing::info!(socket = %config.socket_path.display(), "daemon listening");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        let _ = shutdown_tx_clone.send(()).await;
    });

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        let shutdown_tx = shutdown_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(state, stream, shutdown_tx).await {
                                tracing::debug!(error = %e, "client error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept error");
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                tracing::info!("shutting down daemon");
                break;
            }
        }
    }

    state.flush_sessions().await;

    config.remove_pid().ok();
    config.remove_socket().ok();

    tracing::info!("daemon stopped");
    Ok(())
}

use crate::models::DiagnosticsResponse;
use crate::AppState;
use axum::{extract::State, Json};
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Coordination-layer diagnostics: live connection/room/user counts from the
/// session registry plus process CPU and memory stats.
pub async fn diagnostics(State(state): State<Arc<AppState>>) -> Json<DiagnosticsResponse> {
    let n_conn = state.registry.connection_count() as u32;
    let n_rooms = state.registry.occupied_room_count() as u32;
    let n_users = state.registry.online_user_count() as u32;
    let n_cached_identities = state.verifier.cached_identities() as u32;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_rooms
    );

    Json(DiagnosticsResponse {
        n_conn,
        n_rooms,
        n_users,
        n_cached_identities,
        cpu_usage,
        memory_alloc,
        memory_total,
        memory_free,
    })
}

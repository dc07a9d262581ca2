use crate::{errors::ErrorCode, Ipam};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle ID type - safer than raw pointers
pub type HandleId = u64;

/// Engine type exposed through the C ABI: payloads are UTF-8 strings.
pub type HostIpam = Ipam<String>;

static REGISTRY: Lazy<DashMap<HandleId, HostIpam>> = Lazy::new(DashMap::new);
// 0 is reserved for null/invalid
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Register a new engine and return its handle ID
pub fn register_handle(ipam: HostIpam) -> HandleId {
    let id = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
    REGISTRY.insert(id, ipam);
    id
}

/// Run `f` with shared access to the engine behind `handle_id`.
pub fn with_handle<T, F>(handle_id: HandleId, f: F) -> Result<T, ErrorCode>
where
    F: FnOnce(&HostIpam) -> T,
{
    let entry = REGISTRY.get(&handle_id).ok_or(ErrorCode::InvalidHandle)?;
    Ok(f(entry.value()))
}

/// Run `f` with exclusive access to the engine behind `handle_id`.
///
/// The shard write guard is held until `f` returns, so a precheck and the
/// mutation that follows it cannot interleave with another writer.
pub fn with_handle_mut<T, F>(handle_id: HandleId, f: F) -> Result<T, ErrorCode>
where
    F: FnOnce(&mut HostIpam) -> T,
{
    let mut entry = REGISTRY.get_mut(&handle_id).ok_or(ErrorCode::InvalidHandle)?;
    Ok(f(entry.value_mut()))
}

/// Unregister and drop an engine
pub fn unregister_handle(handle_id: HandleId) -> Result<(), ErrorCode> {
    REGISTRY
        .remove(&handle_id)
        .map(|_| ())
        .ok_or(ErrorCode::InvalidHandle)
}

use crate::{
    constants::KEY_MAX_LEN,
    errors::{map_error, set_last_error, Error, ErrorCode},
    handle_registry::{register_handle, unregister_handle, with_handle, with_handle_mut, HandleId, HostIpam},
    init_logging, telemetry,
};
use std::{
    ffi::{c_void, CStr, CString},
    net::IpAddr,
    os::raw::c_char,
};

/// Longest-prefix-match record returned by `ipam_lookup`.
#[repr(C)]
pub struct IpamMatchT {
    /// NUL-terminated canonical key, e.g. `10.0.0.0/24`.
    pub prefix: [c_char; KEY_MAX_LEN],
    /// `FLAG_PREFIX | FLAG_RANGE | FLAG_ADDRESS` bits of the matched record.
    pub flags: u8,
}

/// Walk visitor: canonical key, record flags, caller's context.
/// Returning `false` stops the walk.
pub type IpamWalkCallback =
    extern "C" fn(prefix: *const c_char, flags: u8, user_data: *mut c_void) -> bool;

// ─────────────────────────── helpers ─────────────────────────────────── //

#[inline]
fn cstr<'a>(p: *const c_char) -> Result<&'a str, ErrorCode> {
    if p.is_null() {
        return Err(ErrorCode::Utf8Error);
    }
    unsafe { CStr::from_ptr(p) }
        .to_str()
        .map_err(|_| ErrorCode::Utf8Error)
}

/// Copies `s` into `dst`, truncating, always NUL-terminated.
#[inline]
fn write_key(dst: &mut [c_char; KEY_MAX_LEN], s: &str) {
    dst.iter_mut().for_each(|b| *b = 0);
    let n = s.len().min(KEY_MAX_LEN - 1);
    for (d, b) in dst.iter_mut().zip(&s.as_bytes()[..n]) {
        *d = *b as c_char;
    }
}

#[inline]
fn report(code: ErrorCode) -> ErrorCode {
    set_last_error(code);
    code
}

#[inline]
fn done(result: Result<(), Error>) -> ErrorCode {
    match result {
        Ok(()) => {
            set_last_error(ErrorCode::Success);
            ErrorCode::Success
        }
        Err(e) => report(map_error(&e)),
    }
}

// ─── small helper to turn Result<T,ErrorCode> into early-return ──────────
macro_rules! try_c { ($expr:expr) => { match $expr {
    Ok(v)  => v,
    Err(e) => return report(e),
}}}

/// Parses `text` and runs `op` under the handle's write guard.
fn mutate<F>(h: HandleId, text: *const c_char, op: F) -> ErrorCode
where
    F: FnOnce(&mut HostIpam, &str) -> Result<(), Error>,
{
    let text = try_c!(cstr(text));
    done(try_c!(with_handle_mut(h, |ipam| op(ipam, text))))
}

fn mutate_with_value<F>(h: HandleId, text: *const c_char, value: *const c_char, op: F) -> ErrorCode
where
    F: FnOnce(&mut HostIpam, &str, String) -> Result<(), Error>,
{
    let value = try_c!(cstr(value)).to_owned();
    mutate(h, text, |ipam, text| op(ipam, text, value))
}

fn precheck<F>(h: HandleId, text: *const c_char, out_ok: *mut bool, op: F) -> ErrorCode
where
    F: FnOnce(&mut HostIpam, &str) -> Result<bool, Error>,
{
    if out_ok.is_null() {
        return report(ErrorCode::InvalidHandle);
    }
    let text = try_c!(cstr(text));
    match try_c!(with_handle_mut(h, |ipam| op(ipam, text))) {
        Ok(ok) => {
            unsafe { *out_ok = ok };
            report(ErrorCode::Success)
        }
        Err(e) => report(map_error(&e)),
    }
}

// ───────────────────────── lifetime ──────────────────────────────────── //

/// Creates an empty engine and stores its handle in `*out`.
#[no_mangle]
pub extern "C" fn ipam_open(out: *mut HandleId) -> ErrorCode {
    if out.is_null() {
        return report(ErrorCode::InvalidHandle);
    }
    init_logging();
    telemetry::init();
    let h = register_handle(HostIpam::new());
    unsafe { *out = h };
    log::info!("[OPEN] handle={h}");
    report(ErrorCode::Success)
}

#[no_mangle]
pub extern "C" fn ipam_close(h: HandleId) -> ErrorCode {
    try_c!(unregister_handle(h));
    report(ErrorCode::Success)
}

// ───────────────────────── precheck ──────────────────────────────────── //

#[no_mangle]
pub extern "C" fn ipam_precheck_addition(
    h: HandleId,
    text_utf8: *const c_char,
    out_ok: *mut bool,
) -> ErrorCode {
    precheck(h, text_utf8, out_ok, |ipam, t| ipam.precheck_addition(t))
}

#[no_mangle]
pub extern "C" fn ipam_precheck_deletion(
    h: HandleId,
    text_utf8: *const c_char,
    out_ok: *mut bool,
) -> ErrorCode {
    precheck(h, text_utf8, out_ok, |ipam, t| ipam.precheck_deletion(t))
}

// ───────────────────────── CRUD ──────────────────────────────────────── //

#[no_mangle]
pub extern "C" fn ipam_add_prefix(
    h: HandleId,
    prefix_utf8: *const c_char,
    value_utf8: *const c_char,
) -> ErrorCode {
    mutate_with_value(h, prefix_utf8, value_utf8, |ipam, t, v| ipam.add_prefix(t, v))
}

#[no_mangle]
pub extern "C" fn ipam_add_range(
    h: HandleId,
    range_utf8: *const c_char,
    value_utf8: *const c_char,
) -> ErrorCode {
    mutate_with_value(h, range_utf8, value_utf8, |ipam, t, v| ipam.add_range(t, v))
}

#[no_mangle]
pub extern "C" fn ipam_add_address(
    h: HandleId,
    addr_utf8: *const c_char,
    value_utf8: *const c_char,
) -> ErrorCode {
    mutate_with_value(h, addr_utf8, value_utf8, |ipam, t, v| ipam.add_address(t, v))
}

/// Adds a prefix, range or address depending on the text.
#[no_mangle]
pub extern "C" fn ipam_allocate(
    h: HandleId,
    text_utf8: *const c_char,
    value_utf8: *const c_char,
) -> ErrorCode {
    mutate_with_value(h, text_utf8, value_utf8, |ipam, t, v| ipam.allocate(t, v))
}

#[no_mangle]
pub extern "C" fn ipam_delete_prefix(h: HandleId, prefix_utf8: *const c_char) -> ErrorCode {
    mutate(h, prefix_utf8, |ipam, t| ipam.delete_prefix(t))
}

#[no_mangle]
pub extern "C" fn ipam_delete_range(h: HandleId, range_utf8: *const c_char) -> ErrorCode {
    mutate(h, range_utf8, |ipam, t| ipam.delete_range(t))
}

#[no_mangle]
pub extern "C" fn ipam_delete_address(h: HandleId, addr_utf8: *const c_char) -> ErrorCode {
    mutate(h, addr_utf8, |ipam, t| ipam.delete_address(t))
}

/// Prechecked delete of a prefix, range or address.
#[no_mangle]
pub extern "C" fn ipam_release(h: HandleId, text_utf8: *const c_char) -> ErrorCode {
    mutate(h, text_utf8, |ipam, t| ipam.release(t))
}

// ───────────────────────── queries ───────────────────────────────────── //

#[no_mangle]
pub extern "C" fn ipam_lookup(
    h: HandleId,
    addr_utf8: *const c_char,
    out: *mut IpamMatchT,
) -> ErrorCode {
    if out.is_null() {
        return report(ErrorCode::InvalidHandle);
    }
    let addr_s = try_c!(cstr(addr_utf8));
    let addr: IpAddr = try_c!(addr_s.trim().parse().map_err(|_| ErrorCode::ParseFailed));
    let found = try_c!(with_handle(h, |ipam| {
        ipam.lookup(addr).map(|(key, rec)| (key.to_string(), rec.flags().bits()))
    }));
    match found {
        Some((key, flags)) => {
            unsafe {
                write_key(&mut (*out).prefix, &key);
                (*out).flags = flags;
            }
            report(ErrorCode::Success)
        }
        None => report(ErrorCode::NotFound),
    }
}

/// Copies the value stored for an allocation into `buf` (NUL-terminated).
#[no_mangle]
pub extern "C" fn ipam_get_value(
    h: HandleId,
    text_utf8: *const c_char,
    buf: *mut c_char,
    buf_len: usize,
) -> ErrorCode {
    if buf.is_null() {
        return report(ErrorCode::BufferTooSmall);
    }
    let text = try_c!(cstr(text_utf8));
    let value = try_c!(with_handle(h, |ipam| ipam.get(text).map(|v| v.cloned())));
    let value = match value {
        Ok(Some(v)) => v,
        Ok(None) => return report(ErrorCode::NotFound),
        Err(e) => return report(map_error(&e)),
    };
    if value.len() + 1 > buf_len {
        return report(ErrorCode::BufferTooSmall);
    }
    unsafe {
        std::ptr::copy_nonoverlapping(value.as_ptr() as *const c_char, buf, value.len());
        *buf.add(value.len()) = 0;
    }
    report(ErrorCode::Success)
}

#[no_mangle]
pub extern "C" fn ipam_size(h: HandleId, out: *mut u64) -> ErrorCode {
    if out.is_null() {
        return report(ErrorCode::InvalidHandle);
    }
    let n = try_c!(with_handle(h, |ipam| ipam.len()));
    unsafe { *out = n as u64 };
    report(ErrorCode::Success)
}

/// Calls `cb` for every stored key. The keys are collected first, so the
/// callback may call back into this handle.
#[no_mangle]
pub extern "C" fn ipam_walk(h: HandleId, cb: IpamWalkCallback, user_data: *mut c_void) -> ErrorCode {
    let entries = try_c!(with_handle(h, |ipam| {
        let mut out = Vec::with_capacity(ipam.len());
        ipam.walk(|key, rec| {
            out.push((key.to_string(), rec.flags().bits()));
            true
        });
        out
    }));
    for (key, flags) in entries {
        let key = try_c!(CString::new(key).map_err(|_| ErrorCode::Utf8Error));
        if !cb(key.as_ptr(), flags, user_data) {
            break;
        }
    }
    report(ErrorCode::Success)
}

#[no_mangle]
pub extern "C" fn ipam_clear(h: HandleId) -> ErrorCode {
    try_c!(with_handle_mut(h, |ipam| ipam.clear()));
    report(ErrorCode::Success)
}

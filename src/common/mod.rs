pub mod io;

/// Format an IO error message without the "(os error N)" suffix.
/// Rust's Display impl adds " (os error 2)" after the OS description;
/// errors reported to the user read better without it.
pub fn io_error_msg(e: &std::io::Error) -> String {
    if let Some(raw) = e.raw_os_error() {
        let os_err = std::io::Error::from_raw_os_error(raw);
        let msg = format!("{}", os_err);
        msg.replace(&format!(" (os error {})", raw), "")
    } else {
        format!("{}", e)
    }
}

//! `sd_notify`-alike readiness/watchdog signaling over the `NOTIFY_SOCKET`
//! Unix datagram socket, including abstract socket names (`@/...`).
//!
//! This has no direct analog upstream; it is modeled on the Unix-domain
//! datagram idiom the rest of this codebase already leans on for local IPC.

use std::io;
use std::os::unix::net::UnixDatagram;

pub struct Notifier {
    socket: Option<UnixDatagram>,
}

impl Notifier {
    /// Reads `NOTIFY_SOCKET` from the environment. Absent or empty means
    /// the process isn't running under a supervisor that cares; all
    /// notify calls then become no-ops.
    pub fn from_env() -> Self {
        match std::env::var("NOTIFY_SOCKET") {
            Ok(path) if !path.is_empty() => match connect(&path) {
                Ok(socket) => Notifier { socket: Some(socket) },
                Err(e) => {
                    tracing::warn!(error = %e, "failed to connect to NOTIFY_SOCKET");
                    Notifier { socket: None }
                }
            },
            _ => Notifier { socket: None },
        }
    }

    pub fn ready(&self) {
        self.send("READY=1");
    }

    pub fn stopping(&self) {
        self.send("STOPPING=1");
    }

    pub fn status(&self, text: &str) {
        self.send(&format!("STATUS={text}"));
    }

    pub fn watchdog(&self) {
        self.send("WATCHDOG=1");
    }

    fn send(&self, message: &str) {
        if let Some(socket) = &self.socket {
            if let Err(e) = socket.send(message.as_bytes()) {
                tracing::warn!(error = %e, message, "sd_notify send failed");
            }
        }
    }
}

fn connect(path: &str) -> io::Result<UnixDatagram> {
    let socket = UnixDatagram::unbound()?;
    if let Some(abstract_name) = path.strip_prefix('@') {
        connect_abstract(&socket, abstract_name)?;
    } else {
        socket.connect(path)?;
    }
    Ok(socket)
}

#[cfg(target_os = "linux")]
fn connect_abstract(socket: &UnixDatagram, name: &str) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    use std::os::unix::ffi::OsStrExt;

    let name_bytes = std::ffi::OsStr::new(name).as_bytes();
    // Abstract addresses store the name after a leading NUL byte rather
    // than a path; sun_path is zeroed and the name written starting at
    // offset 1.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    if name_bytes.len() + 1 > addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "abstract socket name too long",
        ));
    }
    for (i, &b) in name_bytes.iter().enumerate() {
        addr.sun_path[i + 1] = b as libc::c_char;
    }
    let len = std::mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len();

    let ret = unsafe {
        libc::connect(
            socket.as_raw_fd(),
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            len as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(_socket: &UnixDatagram, _name: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract sockets are Linux-only",
    ))
}

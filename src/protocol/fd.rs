// src/protocol/fd.rs

//! Descriptor passing over the supervisor's datagram control channel.
//!
//! Each datagram carries one `SCM_RIGHTS` descriptor and a single dummy
//! payload byte. std/`mio`/`tokio` don't expose ancillary data, so the
//! `recvmsg`/`sendmsg` calls are made directly through `libc`.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixDatagram as StdUnixDatagram;
use std::ptr;

use socket2::SockRef;
use tokio::io::Interest;
use tokio::net::UnixDatagram;
use tracing::warn;

/// Environment variable announcing the inherited control-channel descriptor
/// number to the root process.
pub const MASTER_FD_ENV: &str = "FORKTREE_MASTER_FD";

/// Room for a handful of descriptors; anything past the first is closed.
const CONTROL_WORDS: usize = 16;

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const RECV_FLAGS: libc::c_int = 0;

/// Supervisor-side end of the control channel.
#[derive(Debug)]
pub struct ControlChannel {
    socket: UnixDatagram,
}

impl ControlChannel {
    /// Create the connected datagram pair.
    ///
    /// Returns the supervisor end and the remote end. The remote end is left
    /// inheritable so a launched root process keeps it across `exec`.
    pub fn open() -> io::Result<(Self, OwnedFd)> {
        let (local, remote) = StdUnixDatagram::pair()?;
        SockRef::from(&remote).set_cloexec(false)?;
        Ok((Self::from_std(local)?, OwnedFd::from(remote)))
    }

    pub fn from_std(socket: StdUnixDatagram) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: UnixDatagram::from_std(socket)?,
        })
    }

    /// Wait for the next datagram and return the descriptor it carried.
    ///
    /// A datagram without a descriptor is an error; the channel itself stays
    /// usable afterwards.
    pub async fn recv_descriptor(&self) -> io::Result<OwnedFd> {
        self.socket
            .async_io(Interest::READABLE, || recv_descriptor(&self.socket))
            .await
    }
}

/// Receive one datagram from `socket` and take the first descriptor in it.
pub fn recv_descriptor<S: AsRawFd>(socket: &S) -> io::Result<OwnedFd> {
    let mut payload = [0u8; 64];
    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr().cast(),
        iov_len: payload.len(),
    };
    let mut control = [0u64; CONTROL_WORDS];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = mem::size_of_val(&control) as _;

    let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, RECV_FLAGS) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `msg` was filled in by a successful `recvmsg`, and its control
    // pointer still refers to `control`.
    let mut received = unsafe { take_descriptors(&msg) };

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "control data truncated while receiving descriptor",
        ));
    }

    if received.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "datagram carried no descriptor",
        ));
    }

    let fd = received.remove(0);
    if !received.is_empty() {
        warn!(extra = received.len(), "closing extra descriptors in datagram");
    }
    Ok(fd)
}

/// Send `fd` over `socket` as a single-descriptor datagram.
pub fn send_descriptor<S: AsRawFd>(socket: &S, fd: BorrowedFd<'_>) -> io::Result<()> {
    let payload = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };
    let mut control = [0u64; CONTROL_WORDS];
    let fd_len = mem::size_of::<RawFd>() as libc::c_uint;

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = unsafe { libc::CMSG_SPACE(fd_len) } as _;

    // SAFETY: the control buffer is large enough for one SCM_RIGHTS entry,
    // so CMSG_FIRSTHDR is non-null and CMSG_DATA points inside `control`.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(fd_len) as _;
        ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<RawFd>(), fd.as_raw_fd());
    }

    let n = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Collect every `SCM_RIGHTS` descriptor from a received message header.
///
/// ## Safety
///
/// `msg` must describe a control buffer filled in by a successful `recvmsg`.
unsafe fn take_descriptors(msg: &libc::msghdr) -> Vec<OwnedFd> {
    let mut fds = Vec::new();
    let header_len = unsafe { libc::CMSG_LEN(0) } as usize;

    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(msg) };
    while !cmsg.is_null() {
        let header = unsafe { &*cmsg };
        if header.cmsg_level == libc::SOL_SOCKET && header.cmsg_type == libc::SCM_RIGHTS {
            let data = unsafe { libc::CMSG_DATA(cmsg) }.cast::<RawFd>();
            let count = (header.cmsg_len as usize).saturating_sub(header_len) / mem::size_of::<RawFd>();
            for i in 0..count {
                let raw = unsafe { ptr::read_unaligned(data.add(i)) };
                fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
            }
        }
        cmsg = unsafe { libc::CMSG_NXTHDR(msg, cmsg) };
    }

    fds
}

//! FFI backend over an installed libsrt
//!
//! Enabled with the `libsrt` cargo feature; the default build does not
//! link the native library. Address marshalling goes through
//! `socket2::SockAddr` so the sockaddr layout never leaks past this
//! module.

use crate::api::{ApiResult, EpollEvent, SockState, SrtApi, SrtStats, SRT_ERROR};
use crate::error::{codes, NativeError};
use crate::options::{OptValue, SockOpt};
use bytes::Bytes;
use socket2::SockAddr;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::net::{SocketAddr, ToSocketAddrs};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

type SrtSocket = c_int;

/// Upper bound on events returned by one `epoll_uwait`.
const UWAIT_CAPACITY: usize = 256;

#[repr(C)]
#[derive(Clone, Copy)]
struct SysEpollEvent {
    fd: SrtSocket,
    events: c_int,
}

/// Native `CBytePerfMon` layout from `srt.h`. Field order and widths must
/// match the installed library exactly; `srt_bstats` writes the whole
/// struct.
#[repr(C)]
#[derive(Clone, Copy)]
struct CBytePerfMon {
    ms_time_stamp: i64,
    pkt_sent_total: i64,
    pkt_recv_total: i64,
    pkt_snd_loss_total: c_int,
    pkt_rcv_loss_total: c_int,
    pkt_retrans_total: c_int,
    pkt_sent_ack_total: c_int,
    pkt_recv_ack_total: c_int,
    pkt_sent_nak_total: c_int,
    pkt_recv_nak_total: c_int,
    us_snd_duration_total: i64,
    pkt_snd_drop_total: c_int,
    pkt_rcv_drop_total: c_int,
    pkt_rcv_undecrypt_total: c_int,
    byte_sent_total: u64,
    byte_recv_total: u64,
    byte_rcv_loss_total: u64,
    byte_retrans_total: u64,
    byte_snd_drop_total: u64,
    byte_rcv_drop_total: u64,
    byte_rcv_undecrypt_total: u64,
    pkt_sent: i64,
    pkt_recv: i64,
    pkt_snd_loss: c_int,
    pkt_rcv_loss: c_int,
    pkt_retrans: c_int,
    pkt_rcv_retrans: c_int,
    pkt_sent_ack: c_int,
    pkt_recv_ack: c_int,
    pkt_sent_nak: c_int,
    pkt_recv_nak: c_int,
    mbps_send_rate: f64,
    mbps_recv_rate: f64,
    us_snd_duration: i64,
    pkt_reorder_distance: c_int,
    pkt_rcv_avg_belated_time: f64,
    pkt_rcv_belated: i64,
    pkt_snd_drop: c_int,
    pkt_rcv_drop: c_int,
    pkt_rcv_undecrypt: c_int,
    byte_sent: u64,
    byte_recv: u64,
    byte_rcv_loss: u64,
    byte_retrans: u64,
    byte_snd_drop: u64,
    byte_rcv_drop: u64,
    byte_rcv_undecrypt: u64,
    us_pkt_snd_period: f64,
    pkt_flow_window: c_int,
    pkt_congestion_window: c_int,
    pkt_flight_size: c_int,
    ms_rtt: f64,
    mbps_bandwidth: f64,
    byte_avail_snd_buf: c_int,
    byte_avail_rcv_buf: c_int,
    mbps_max_bw: f64,
    byte_mss: c_int,
    pkt_snd_buf: c_int,
    byte_snd_buf: c_int,
    ms_snd_buf: c_int,
    ms_snd_tsb_pd_delay: c_int,
    pkt_rcv_buf: c_int,
    byte_rcv_buf: c_int,
    ms_rcv_buf: c_int,
    ms_rcv_tsb_pd_delay: c_int,
    pkt_snd_filter_extra_total: c_int,
    pkt_rcv_filter_extra_total: c_int,
    pkt_rcv_filter_supply_total: c_int,
    pkt_rcv_filter_loss_total: c_int,
    pkt_snd_filter_extra: c_int,
    pkt_rcv_filter_extra: c_int,
    pkt_rcv_filter_supply: c_int,
    pkt_rcv_filter_loss: c_int,
    pkt_reorder_tolerance: c_int,
    pkt_sent_unique_total: i64,
    pkt_recv_unique_total: i64,
    byte_sent_unique_total: u64,
    byte_recv_unique_total: u64,
    pkt_sent_unique: i64,
    pkt_recv_unique: i64,
    byte_sent_unique: u64,
    byte_recv_unique: u64,
}

extern "C" {
    fn srt_startup() -> c_int;
    fn srt_cleanup() -> c_int;
    fn srt_create_socket() -> SrtSocket;
    fn srt_bind(u: SrtSocket, name: *const c_void, namelen: c_int) -> c_int;
    fn srt_listen(u: SrtSocket, backlog: c_int) -> c_int;
    fn srt_connect(u: SrtSocket, name: *const c_void, namelen: c_int) -> c_int;
    fn srt_accept(u: SrtSocket, addr: *mut c_void, addrlen: *mut c_int) -> SrtSocket;
    fn srt_close(u: SrtSocket) -> c_int;
    fn srt_recvmsg(u: SrtSocket, buf: *mut c_char, len: c_int) -> c_int;
    fn srt_sendmsg(u: SrtSocket, buf: *const c_char, len: c_int, ttl: c_int, inorder: c_int)
        -> c_int;
    fn srt_setsockflag(u: SrtSocket, opt: c_int, optval: *const c_void, optlen: c_int) -> c_int;
    fn srt_getsockflag(u: SrtSocket, opt: c_int, optval: *mut c_void, optlen: *mut c_int)
        -> c_int;
    fn srt_getsockstate(u: SrtSocket) -> c_int;
    fn srt_epoll_create() -> c_int;
    fn srt_epoll_add_usock(eid: c_int, u: SrtSocket, events: *const c_int) -> c_int;
    fn srt_epoll_uwait(
        eid: c_int,
        fds_set: *mut SysEpollEvent,
        fds_size: c_int,
        ms_timeout: i64,
    ) -> c_int;
    fn srt_getlasterror(errno_loc: *mut c_int) -> c_int;
    fn srt_getlasterror_str() -> *const c_char;
    fn srt_clearlasterror();
    fn srt_setloglevel(ll: c_int);
    fn srt_bstats(u: SrtSocket, perf: *mut CBytePerfMon, clear: c_int) -> c_int;
}

static INSTANCES: AtomicUsize = AtomicUsize::new(0);

fn last_error() -> NativeError {
    unsafe {
        let code = srt_getlasterror(ptr::null_mut());
        let message = CStr::from_ptr(srt_getlasterror_str())
            .to_string_lossy()
            .into_owned();
        srt_clearlasterror();
        NativeError::new(code, message)
    }
}

fn check(rc: c_int) -> ApiResult<()> {
    if rc == SRT_ERROR {
        Err(last_error())
    } else {
        Ok(())
    }
}

fn resolve(host: &str, port: u16) -> ApiResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| NativeError::new(codes::ECONNSETUP, format!("resolve {host}: {e}")))?
        .next()
        .ok_or_else(|| {
            NativeError::new(codes::ECONNSETUP, format!("{host} resolves to no address"))
        })
}

/// Value kind of a socket option, for reading it back.
enum OptKind {
    Bool,
    Int,
    Int64,
    Str,
}

fn opt_kind(opt: SockOpt) -> OptKind {
    match opt {
        SockOpt::SndSyn
        | SockOpt::RcvSyn
        | SockOpt::Rendezvous
        | SockOpt::ReuseAddr
        | SockOpt::Sender
        | SockOpt::TsbPdMode
        | SockOpt::TlPktDrop
        | SockOpt::NakReport
        | SockOpt::DriftTracer
        | SockOpt::MessageApi
        | SockOpt::EnforcedEncryption => OptKind::Bool,
        SockOpt::MaxBw | SockOpt::InputBw | SockOpt::MinInputBw => OptKind::Int64,
        SockOpt::Passphrase
        | SockOpt::StreamId
        | SockOpt::Congestion
        | SockOpt::PacketFilter
        | SockOpt::BindToDevice => OptKind::Str,
        _ => OptKind::Int,
    }
}

/// [`SrtApi`] backend over the installed native library.
///
/// The library is started on first construction and cleaned up when the
/// last backend drops.
pub struct LibSrt;

impl LibSrt {
    pub fn new() -> Self {
        if INSTANCES.fetch_add(1, Ordering::SeqCst) == 0 {
            unsafe { srt_startup() };
        }
        LibSrt
    }
}

impl Default for LibSrt {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LibSrt {
    fn drop(&mut self) {
        if INSTANCES.fetch_sub(1, Ordering::SeqCst) == 1 {
            unsafe { srt_cleanup() };
        }
    }
}

/// Forward the 0-7 log level to the native library without constructing a
/// backend. Process-wide; safe to call repeatedly.
pub fn set_native_log_level(level: i32) {
    unsafe { srt_setloglevel(level) };
}

impl SrtApi for LibSrt {
    fn create_socket(&mut self, sender: bool) -> ApiResult<i32> {
        let fd = unsafe { srt_create_socket() };
        if fd == SRT_ERROR {
            return Err(last_error());
        }
        if sender {
            let one: c_int = 1;
            check(unsafe {
                srt_setsockflag(
                    fd,
                    SockOpt::Sender.as_raw(),
                    &one as *const c_int as *const c_void,
                    std::mem::size_of::<c_int>() as c_int,
                )
            })?;
        }
        Ok(fd)
    }

    fn bind(&mut self, fd: i32, addr: &str, port: u16) -> ApiResult<()> {
        let addr = resolve(addr, port)?;
        let addr = SockAddr::from(addr);
        check(unsafe { srt_bind(fd, addr.as_ptr() as *const c_void, addr.len() as c_int) })
    }

    fn listen(&mut self, fd: i32, backlog: i32) -> ApiResult<()> {
        check(unsafe { srt_listen(fd, backlog) })
    }

    fn connect(&mut self, fd: i32, host: &str, port: u16) -> ApiResult<()> {
        let addr = resolve(host, port)?;
        let addr = SockAddr::from(addr);
        check(unsafe { srt_connect(fd, addr.as_ptr() as *const c_void, addr.len() as c_int) })
    }

    fn accept(&mut self, fd: i32) -> ApiResult<i32> {
        let accepted = unsafe { srt_accept(fd, ptr::null_mut(), ptr::null_mut()) };
        if accepted == SRT_ERROR {
            Err(last_error())
        } else {
            Ok(accepted)
        }
    }

    fn close(&mut self, fd: i32) -> ApiResult<()> {
        check(unsafe { srt_close(fd) })
    }

    fn read(&mut self, fd: i32, max_bytes: usize) -> ApiResult<Option<Bytes>> {
        let mut buf = vec![0u8; max_bytes];
        let n = unsafe { srt_recvmsg(fd, buf.as_mut_ptr() as *mut c_char, max_bytes as c_int) };
        if n == SRT_ERROR {
            let error = last_error();
            return match error.code {
                // Nothing pending on a non-blocking socket.
                codes::EASYNCRCV => Ok(Some(Bytes::new())),
                // Peer gone: end of stream.
                codes::ECONNLOST | codes::ENOCONN => Ok(None),
                _ => Err(error),
            };
        }
        buf.truncate(n as usize);
        Ok(Some(Bytes::from(buf)))
    }

    fn write(&mut self, fd: i32, payload: Bytes) -> ApiResult<usize> {
        let n = unsafe {
            srt_sendmsg(
                fd,
                payload.as_ptr() as *const c_char,
                payload.len() as c_int,
                -1,
                1,
            )
        };
        if n == SRT_ERROR {
            Err(last_error())
        } else {
            Ok(n as usize)
        }
    }

    fn set_sock_opt(&mut self, fd: i32, opt: SockOpt, value: OptValue) -> ApiResult<()> {
        let rc = match value {
            OptValue::Bool(v) => {
                let v: c_int = v.into();
                unsafe {
                    srt_setsockflag(
                        fd,
                        opt.as_raw(),
                        &v as *const c_int as *const c_void,
                        std::mem::size_of::<c_int>() as c_int,
                    )
                }
            }
            OptValue::Int(v) => unsafe {
                srt_setsockflag(
                    fd,
                    opt.as_raw(),
                    &v as *const c_int as *const c_void,
                    std::mem::size_of::<c_int>() as c_int,
                )
            },
            OptValue::Int64(v) => unsafe {
                srt_setsockflag(
                    fd,
                    opt.as_raw(),
                    &v as *const i64 as *const c_void,
                    std::mem::size_of::<i64>() as c_int,
                )
            },
            OptValue::Str(v) => {
                let v = CString::new(v)
                    .map_err(|_| NativeError::new(codes::ECONNSETUP, "option contains NUL"))?;
                unsafe {
                    srt_setsockflag(
                        fd,
                        opt.as_raw(),
                        v.as_ptr() as *const c_void,
                        v.as_bytes().len() as c_int,
                    )
                }
            }
        };
        check(rc)
    }

    fn get_sock_opt(&mut self, fd: i32, opt: SockOpt) -> ApiResult<OptValue> {
        match opt_kind(opt) {
            OptKind::Bool => {
                let mut v: c_int = 0;
                let mut len = std::mem::size_of::<c_int>() as c_int;
                check(unsafe {
                    srt_getsockflag(fd, opt.as_raw(), &mut v as *mut c_int as *mut c_void, &mut len)
                })?;
                Ok(OptValue::Bool(v != 0))
            }
            OptKind::Int => {
                let mut v: c_int = 0;
                let mut len = std::mem::size_of::<c_int>() as c_int;
                check(unsafe {
                    srt_getsockflag(fd, opt.as_raw(), &mut v as *mut c_int as *mut c_void, &mut len)
                })?;
                Ok(OptValue::Int(v))
            }
            OptKind::Int64 => {
                let mut v: i64 = 0;
                let mut len = std::mem::size_of::<i64>() as c_int;
                check(unsafe {
                    srt_getsockflag(fd, opt.as_raw(), &mut v as *mut i64 as *mut c_void, &mut len)
                })?;
                Ok(OptValue::Int64(v))
            }
            OptKind::Str => {
                let mut buf = [0u8; 512];
                let mut len = buf.len() as c_int;
                check(unsafe {
                    srt_getsockflag(fd, opt.as_raw(), buf.as_mut_ptr() as *mut c_void, &mut len)
                })?;
                let value = String::from_utf8_lossy(&buf[..len.max(0) as usize]).into_owned();
                Ok(OptValue::Str(value))
            }
        }
    }

    fn sock_state(&mut self, fd: i32) -> ApiResult<SockState> {
        let raw = unsafe { srt_getsockstate(fd) };
        Ok(SockState::from_raw(raw).unwrap_or(SockState::NonExist))
    }

    fn epoll_create(&mut self) -> ApiResult<i32> {
        let epid = unsafe { srt_epoll_create() };
        if epid == SRT_ERROR {
            Err(last_error())
        } else {
            Ok(epid)
        }
    }

    fn epoll_add_usock(&mut self, epid: i32, fd: i32, flags: u32) -> ApiResult<()> {
        let events = flags as c_int;
        check(unsafe { srt_epoll_add_usock(epid, fd, &events) })
    }

    fn epoll_uwait(&mut self, epid: i32, timeout_ms: i64) -> ApiResult<Vec<EpollEvent>> {
        let mut events = [SysEpollEvent { fd: 0, events: 0 }; UWAIT_CAPACITY];
        let n = unsafe {
            srt_epoll_uwait(epid, events.as_mut_ptr(), UWAIT_CAPACITY as c_int, timeout_ms)
        };
        if n == SRT_ERROR {
            return Err(last_error());
        }
        Ok(events[..n.max(0) as usize]
            .iter()
            .map(|ev| EpollEvent {
                fd: ev.fd,
                flags: ev.events as u32,
            })
            .collect())
    }

    fn set_log_level(&mut self, level: i32) -> ApiResult<()> {
        set_native_log_level(level);
        Ok(())
    }

    fn stats(&mut self, fd: i32, clear: bool) -> ApiResult<SrtStats> {
        let mut perf = unsafe { std::mem::zeroed::<CBytePerfMon>() };
        check(unsafe { srt_bstats(fd, &mut perf, clear.into()) })?;
        Ok(SrtStats {
            ms_time_stamp: perf.ms_time_stamp,
            pkt_sent: perf.pkt_sent,
            pkt_recv: perf.pkt_recv,
            pkt_snd_loss: perf.pkt_snd_loss,
            pkt_rcv_loss: perf.pkt_rcv_loss,
            pkt_retrans: perf.pkt_retrans,
            byte_sent: perf.byte_sent,
            byte_recv: perf.byte_recv,
            mbps_send_rate: perf.mbps_send_rate,
            mbps_recv_rate: perf.mbps_recv_rate,
            ms_rtt: perf.ms_rtt,
            mbps_bandwidth: perf.mbps_bandwidth,
            byte_avail_snd_buf: perf.byte_avail_snd_buf,
            byte_avail_rcv_buf: perf.byte_avail_rcv_buf,
        })
    }
}

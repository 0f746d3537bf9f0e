use std::fs;
use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use lansync_config::CHUNK_SIZE;
use lansync_core::entities::{FileMeta, WireMessage};
use lansync_core::helpers::{create_buffer, short_hash};
use lansync_core::utils::Logger;
use sha2::{Digest, Sha256};

use crate::transport::{PlainReader, TlsStream};
use crate::wire::{write_frame, FrameReader};
use crate::NodeContext;

static LOGGER: Logger = Logger::verbose("Session");

/// Accept loop: one thread per connection, handshake first.
pub fn serve(ctx: Arc<NodeContext>, listener: TcpListener) {
    for stream in listener.incoming() {
        match stream {
            Ok(sock) => {
                let ctx = ctx.clone();
                thread::spawn(move || {
                    let peer = sock
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| String::from("?"));
                    match TlsStream::accept(sock, &ctx.tls) {
                        Ok(stream) => run_session(&ctx, Arc::new(stream)),
                        Err(e) => {
                            LOGGER.error(format!("handshake with {} failed: {}", peer, e))
                        }
                    }
                });
            }
            Err(e) => {
                LOGGER.error(format!("accept failed: {}", e));
            }
        }
    }
}

/// Outbound connection; failures are logged and dropped, discovery will
/// surface the address again.
pub fn dial(ctx: Arc<NodeContext>, addr: String) {
    thread::spawn(move || match TlsStream::connect(&addr, &ctx.tls) {
        Ok(stream) => run_session(&ctx, Arc::new(stream)),
        Err(e) => {
            LOGGER.error(format!("dial {} failed: {}", addr, e));
        }
    });
}

/// Drive one session to completion and clean up behind it. The registry
/// entry is removed only if it still points at this connection; a reconnect
/// may already own the slot.
pub fn run_session(ctx: &NodeContext, stream: Arc<TlsStream>) {
    let peer = stream.peer_addr();
    LOGGER.info(format!("session with {} open", peer));

    let mut registered: Option<String> = None;
    match session_loop(ctx, &stream, &mut registered) {
        Ok(()) => LOGGER.info(format!("session with {} closed", peer)),
        Err(e) => LOGGER.error(format!("session with {} failed: {}", peer, e)),
    }

    if let Some(device_id) = registered {
        ctx.registry.unregister(&device_id, &stream);
    }
    stream.shutdown();
}

/// The protocol is symmetric: both ends open with a freshly scanned INDEX,
/// then handle whatever arrives until EOF. Frames are independent; the only
/// carried state is the FILE payload that follows its header.
fn session_loop(
    ctx: &NodeContext,
    stream: &Arc<TlsStream>,
    registered: &mut Option<String>,
) -> io::Result<()> {
    let files = ctx.indexer.scan()?;
    {
        let mut w = stream.writer();
        write_frame(
            &mut w,
            &WireMessage::Index {
                device_id: ctx.device_id.clone(),
                files,
            },
        )?;
    }

    let mut reader = FrameReader::new(PlainReader {
        stream: stream.clone(),
    });
    while let Some(msg) = reader.read_frame()? {
        match msg {
            WireMessage::Index { device_id, files } => {
                LOGGER.info(format!("index from {}: {} files", device_id, files.len()));
                ctx.state.update_peer(&device_id, files);
                ctx.registry.register(&device_id, stream.clone());
                *registered = Some(device_id);
            }
            WireMessage::FileRequest { hash, path } => {
                LOGGER.debug(format!("request for {} ({})", short_hash(&hash), path));
                // Match against the folder as it is now, not as it was
                // indexed; the path in the request is informational only.
                let files = ctx.indexer.scan()?;
                match files.into_iter().find(|f| f.hash == hash) {
                    Some(meta) => send_file(ctx, stream, &meta)?,
                    None => {
                        // Not ours to answer; the requester will ask again.
                        LOGGER.debug(format!("{} not found locally", short_hash(&hash)));
                    }
                }
            }
            WireMessage::File { path, size, hash } => {
                receive_file(&mut reader, ctx.indexer.root(), &path, size, &hash)?;
            }
            WireMessage::ConsensusVote { hash, name } => {
                LOGGER.info(format!("vote: {} -> {}", short_hash(&hash), name));
                // Applied locally only. Propagation is the originator's
                // broadcast reaching each of its connections.
                ctx.state.set_manual(&hash, &name);
            }
            WireMessage::Done => {
                // Writes here are synchronous, so our outbound queue is
                // always drained; keep the link for later broadcasts.
                LOGGER.debug("peer reported done");
            }
        }
    }
    Ok(())
}

/// Header plus body under one write-lock acquisition. The size is whatever
/// the file has at open time; if the content changed since indexing the
/// receiver's hash check will drop it.
fn send_file(ctx: &NodeContext, stream: &TlsStream, meta: &FileMeta) -> io::Result<()> {
    let full = ctx.indexer.root().join(&meta.relative_path);
    let mut file = match fs::File::open(&full) {
        Ok(f) => f,
        Err(e) => {
            // No header went out, so nothing is owed on the wire.
            LOGGER.error(format!("open {:?} failed: {}", full, e));
            return Ok(());
        }
    };
    let size = match file.metadata() {
        Ok(m) => m.len(),
        Err(e) => {
            LOGGER.error(format!("stat {:?} failed: {}", full, e));
            return Ok(());
        }
    };

    let mut w = stream.writer();
    write_frame(
        &mut w,
        &WireMessage::File {
            path: meta.relative_path.clone(),
            size,
            hash: meta.hash.clone(),
        },
    )?;

    let mut buf = create_buffer(CHUNK_SIZE);
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            // The header promised bytes we cannot deliver; framing on this
            // connection is beyond saving.
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while sending",
            ));
        }
        w.write_all(&buf[..n])?;
        remaining -= n as u64;
    }

    LOGGER.done(format!("sent {} ({} bytes)", meta.relative_path, size));
    Ok(())
}

/// Writes to the file and the digest in lockstep, so the payload is hashed
/// exactly as it lands on disk.
struct HashingWriter {
    file: fs::File,
    hasher: Sha256,
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        self.hasher.update(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Pull exactly `size` payload bytes into `path`, verifying against the
/// header hash. A mismatch deletes the file and lets the session continue
/// (framing is intact: the full payload was consumed). A short read or
/// filesystem error deletes the partial file and ends the session.
fn receive_file<R: Read>(
    reader: &mut FrameReader<R>,
    root: &Path,
    path: &str,
    size: u64,
    expect_hash: &str,
) -> io::Result<()> {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut sink = HashingWriter {
        file: fs::File::create(&full)?,
        hasher: Sha256::new(),
    };
    if let Err(e) = reader.read_body(size, &mut sink) {
        drop(sink);
        let _ = fs::remove_file(&full);
        return Err(e);
    }

    let HashingWriter { file, hasher } = sink;
    drop(file);
    let got = hex::encode(hasher.finalize());
    if got != expect_hash {
        let _ = fs::remove_file(&full);
        LOGGER.error(format!("hash mismatch for {}, dropped", path));
    } else {
        LOGGER.done(format!("got {} ({} bytes)", path, size));
    }
    Ok(())
}

//! Criterion benchmarks for the receive path.
//!
//! Measures message reassembly across scratch-buffer sizes and the cost of
//! parsing an HTTP upgrade request head.
//!
//! Run with:
//! ```bash
//! cargo bench --package ws-relay --bench reassembler_bench
//! ```

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ws_relay::application::{FragmentRead, FragmentSource, MessageReassembler, ReceiveError};
use ws_relay::domain::MessageKind;
use ws_relay::infrastructure::handshake::parse_request_head;

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Serves one in-memory message through the caller's buffer, repeatedly.
struct LoopSource {
    payload: Vec<u8>,
    offset: usize,
}

impl LoopSource {
    fn new(len: usize) -> Self {
        Self {
            payload: (0..len).map(|i| (i % 251) as u8).collect(),
            offset: 0,
        }
    }
}

#[async_trait]
impl FragmentSource for LoopSource {
    async fn read_fragment(&mut self, buf: &mut [u8]) -> Result<FragmentRead, ReceiveError> {
        let remaining = &self.payload[self.offset..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.offset += count;
        let end_of_message = self.offset == self.payload.len();
        if end_of_message {
            self.offset = 0;
        }
        Ok(FragmentRead {
            count,
            kind: MessageKind::Binary,
            end_of_message,
        })
    }
}

const UPGRADE: &str = "GET /ws HTTP/1.1\r\n\
    Host: localhost:8080\r\n\
    User-Agent: bench\r\n\
    Connection: Upgrade\r\n\
    Upgrade: websocket\r\n\
    Sec-WebSocket-Version: 13\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Reassembles a 64 KiB message through scratch buffers of varying size.
fn bench_reassemble(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    const MESSAGE: usize = 64 * 1024;

    let mut group = c.benchmark_group("reassemble_64k");
    group.throughput(Throughput::Bytes(MESSAGE as u64));
    for scratch in [512usize, 4096, 16 * 1024] {
        group.bench_with_input(BenchmarkId::new("scratch", scratch), &scratch, |b, &scratch| {
            let mut source = LoopSource::new(MESSAGE);
            let mut reassembler = MessageReassembler::new(scratch, MESSAGE);
            b.iter(|| {
                let message = runtime
                    .block_on(reassembler.next_message(&mut source))
                    .expect("reassembly must succeed");
                black_box(message.payload.len())
            })
        });
    }
    group.finish();
}

/// Parses a typical browser upgrade request head.
fn bench_parse_upgrade(c: &mut Criterion) {
    c.bench_function("parse_request_head", |b| {
        b.iter(|| parse_request_head(black_box(UPGRADE), black_box("/ws")).expect("valid head"))
    });
}

criterion_group!(benches, bench_reassemble, bench_parse_upgrade);
criterion_main!(benches);

//! Property tests for ordering and chunk slicing

use bytes::Bytes;
use proptest::prelude::*;
use srt_async_core::{AsyncSrt, Request};
use srt_async_io::split_mtu;
use srt_async_native::mem::MemNet;

/// A facade operation with no setup requirements.
#[derive(Debug, Clone)]
enum SimpleOp {
    SetLogLevel(i32),
    CreateSocket,
    EpollCreate,
    SockState(i32),
}

impl SimpleOp {
    fn request(&self) -> Request {
        match self {
            SimpleOp::SetLogLevel(level) => Request::SetLogLevel { level: *level },
            SimpleOp::CreateSocket => Request::CreateSocket { sender: false },
            SimpleOp::EpollCreate => Request::EpollCreate,
            SimpleOp::SockState(fd) => Request::SockState { fd: *fd },
        }
    }
}

fn simple_op() -> impl Strategy<Value = SimpleOp> {
    prop_oneof![
        (0i32..8).prop_map(SimpleOp::SetLogLevel),
        Just(SimpleOp::CreateSocket),
        Just(SimpleOp::EpollCreate),
        (1i32..100).prop_map(SimpleOp::SockState),
    ]
}

proptest! {
    #[test]
    fn prop_split_concat_roundtrip(
        data in prop::collection::vec(any::<u8>(), 0..6000),
        mtu in 1usize..2000,
    ) {
        let buffer = Bytes::from(data.clone());
        let chunks = split_mtu(&buffer, mtu);

        let rebuilt: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        prop_assert_eq!(rebuilt, data);

        // Every chunk except the last is exactly one MTU; the last is
        // short but never empty.
        if let Some((last, head)) = chunks.split_last() {
            prop_assert!(head.iter().all(|c| c.len() == mtu));
            prop_assert!(!last.is_empty());
            prop_assert!(last.len() <= mtu);
        }
    }

    #[test]
    fn prop_callbacks_fire_in_submission_order(ops in prop::collection::vec(simple_op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let net = MemNet::new();
            let facade = AsyncSrt::spawn(Box::new(net.api()));

            let (order_tx, order_rx) = std::sync::mpsc::channel();
            let mut pending = Vec::with_capacity(ops.len());
            for (index, op) in ops.iter().enumerate() {
                let tx = order_tx.clone();
                pending.push(
                    facade
                        .submit_with_callback(
                            op.request(),
                            Box::new(move |_| {
                                let _ = tx.send(index);
                            }),
                        )
                        .unwrap(),
                );
            }
            for entry in pending {
                entry.recv().await.unwrap();
            }

            let observed: Vec<usize> = order_rx.try_iter().collect();
            assert_eq!(observed, (0..ops.len()).collect::<Vec<_>>());
            facade.dispose();
        });
    }
}

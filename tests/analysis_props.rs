//! Property tests for stream ownership and detection flags

use assaycam::analysis::AnalyzeResponse;
use assaycam::config::CameraConfig;
use assaycam::events::EventBus;
use assaycam::stream::StreamController;
use assaycam::testing::MockPlatform;
use assaycam::{DetectionFlags, StreamSlot};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Open(StreamSlot, usize),
    Close(StreamSlot),
}

fn slot() -> impl Strategy<Value = StreamSlot> {
    prop_oneof![Just(StreamSlot::Primary), Just(StreamSlot::Secondary)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (slot(), 0usize..3).prop_map(|(s, d)| Op::Open(s, d)),
        slot().prop_map(Op::Close),
    ]
}

const DEVICES: [&str; 3] = ["a", "b", "c"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every acquired stream is released once its slot is closed
    #[test]
    fn prop_streams_never_leak(ops in prop::collection::vec(op(), 1..20)) {
        let platform = Arc::new(MockPlatform::with_devices(&[
            ("a", "Cam A"),
            ("b", "Cam B"),
            ("c", "Cam C"),
        ]));

        tokio_test::block_on(async {
            let controller = StreamController::new(
                platform.clone(),
                Arc::new(tokio::sync::RwLock::new(())),
                EventBus::new(),
                CameraConfig::default(),
            );
            for op in &ops {
                match op {
                    Op::Open(slot, device) => {
                        controller
                            .open(*slot, Some(DEVICES[*device].to_string()))
                            .await
                            .unwrap();
                    }
                    Op::Close(slot) => controller.close(*slot),
                }
                let live = StreamSlot::ALL
                    .iter()
                    .filter(|s| controller.is_live(**s))
                    .count();
                assert_eq!(platform.live_count(), live);
            }
            controller.close_all();
        });

        prop_assert_eq!(platform.live_count(), 0);
    }

    /// Flags only ever go from false to true, one log entry per transition
    #[test]
    fn prop_flags_are_monotonic(responses in prop::collection::vec((any::<bool>(), any::<bool>()), 0..40)) {
        let mut flags = DetectionFlags::default();
        let mut transitions = 0;
        for (rubbing, acid) in responses.iter().copied() {
            let before = flags;
            for kind in AnalyzeResponse::detected(rubbing, acid).signals() {
                if flags.record(kind) {
                    transitions += 1;
                }
            }
            prop_assert!(!before.rubbing_completed || flags.rubbing_completed);
            prop_assert!(!before.acid_completed || flags.acid_completed);
        }

        let saw_rubbing = responses.iter().any(|(r, _)| *r);
        let saw_acid = responses.iter().any(|(_, a)| *a);
        prop_assert_eq!(flags.rubbing_completed, saw_rubbing);
        prop_assert_eq!(flags.acid_completed, saw_acid);
        prop_assert_eq!(transitions, saw_rubbing as usize + saw_acid as usize);
    }
}

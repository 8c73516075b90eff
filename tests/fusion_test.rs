use std::collections::BTreeSet;

use actiontrack::{
    AppearanceExtractor, Detection, Frame, FusionConfig, FusionGroups, IdentityFuser, Patch,
    TrackBuffer, TrackId,
};
use ndarray::{Array2, Array3, s};

/// Mean color of each patch, one RGB row per patch.
struct MeanColor;

impl AppearanceExtractor for MeanColor {
    type Error = std::convert::Infallible;

    fn extract(&mut self, patches: &[&Patch]) -> Result<Array2<f32>, Self::Error> {
        let mut out = Array2::zeros((patches.len(), 3));
        for (i, patch) in patches.iter().enumerate() {
            let pixels = (patch.dim().0 * patch.dim().1) as f32;
            for c in 0..3 {
                let sum: f32 = patch.slice(s![.., .., c]).iter().map(|&v| v as f32).sum();
                out[[i, c]] = sum / pixels;
            }
        }
        Ok(out)
    }
}

const RED: [u8; 3] = [200, 20, 20];
const BLUE: [u8; 3] = [20, 20, 200];
const GREEN: [u8; 3] = [20, 200, 20];

/// A person standing in one of four 10-pixel slots.
#[derive(Clone, Copy)]
struct Person {
    id: TrackId,
    slot: usize,
    color: [u8; 3],
}

fn person(id: TrackId, slot: usize, color: [u8; 3]) -> Person {
    Person { id, slot, color }
}

fn record(buffer: &mut TrackBuffer, index: u64, people: &[Person]) {
    let mut pixels = Array3::<u8>::zeros((20, 40, 3));
    let mut dets = Vec::new();
    for p in people {
        let x = p.slot * 10;
        for c in 0..3 {
            pixels
                .slice_mut(s![.., x..x + 10, c])
                .fill(p.color[c]);
        }
        dets.push(Detection::new(x as f32, 0.0, (x + 10) as f32, 20.0, 0.9, p.id));
    }
    buffer.record(&Frame::new(index, pixels), &dets).unwrap();
}

/// Ids 1 and 2 walk together, 2 leaves, a red person returns as 3, a short
/// green track 4 flickers in at the end.
fn reappearance_buffer() -> TrackBuffer {
    let mut buffer = TrackBuffer::new();
    let mut index = 0;
    for _ in 0..20 {
        record(&mut buffer, index, &[person(1, 0, RED), person(2, 1, BLUE)]);
        index += 1;
    }
    for _ in 0..5 {
        record(&mut buffer, index, &[]);
        index += 1;
    }
    for _ in 0..15 {
        record(&mut buffer, index, &[person(3, 2, RED)]);
        index += 1;
    }
    for _ in 0..4 {
        record(&mut buffer, index, &[person(3, 2, RED), person(4, 3, GREEN)]);
        index += 1;
    }
    buffer
}

fn fuse(buffer: &TrackBuffer) -> FusionGroups {
    IdentityFuser::new(MeanColor, &FusionConfig::default()).fuse(buffer)
}

#[test]
fn test_reappearing_person_is_merged() {
    let groups = fuse(&reappearance_buffer());

    assert_eq!(groups.members(1), Some(&[1, 3][..]));
    assert_eq!(groups.members(2), Some(&[2][..]));
    assert_eq!(groups.members(4), Some(&[4][..]));
    assert_eq!(groups.len(), 3);

    let remap = groups.remap();
    assert_eq!(remap.resolve(3), 1);
    assert_eq!(remap.resolve(2), 2);
}

#[test]
fn test_short_track_falls_back_to_singleton() {
    let groups = fuse(&reappearance_buffer());
    assert!(groups.fallback().contains(&4));
    assert!(!groups.fallback().contains(&3));
}

#[test]
fn test_every_id_lands_in_exactly_one_group() {
    let buffer = reappearance_buffer();
    let groups = fuse(&buffer);

    let mut seen = BTreeSet::new();
    for members in groups.groups().values() {
        for &id in members {
            assert!(seen.insert(id), "id {id} in more than one group");
        }
    }
    assert_eq!(seen, buffer.track_ids());
}

#[test]
fn test_co_occurring_ids_never_share_a_group() {
    let buffer = reappearance_buffer();
    let groups = fuse(&buffer);

    for members in groups.groups().values() {
        for frame in buffer.frame_ids() {
            let present = members.iter().filter(|&id| frame.contains(id)).count();
            assert!(present <= 1, "group {members:?} co-occurs in {frame:?}");
        }
    }
}

#[test]
fn test_identical_people_side_by_side_stay_apart() {
    // Two red ids visible together, then a third red id joins them: the
    // newcomer may not merge into a group that is on screen in the same frame.
    let mut buffer = TrackBuffer::new();
    for i in 0..12 {
        record(&mut buffer, i, &[person(1, 0, RED), person(2, 1, RED)]);
    }
    for i in 12..24 {
        record(
            &mut buffer,
            i,
            &[person(1, 0, RED), person(2, 1, RED), person(3, 2, RED)],
        );
    }

    let groups = fuse(&buffer);
    assert_eq!(groups.len(), 3);
}

#[test]
fn test_fusion_is_deterministic() {
    let buffer = reappearance_buffer();
    let a = fuse(&buffer);
    let b = fuse(&buffer);
    assert_eq!(a.groups(), b.groups());
    assert_eq!(a.fallback(), b.fallback());
}

#[test]
fn test_zero_threshold_never_merges() {
    let buffer = reappearance_buffer();
    let config = FusionConfig::default().with_merge_threshold(0.0);
    let groups = IdentityFuser::new(MeanColor, &config).fuse(&buffer);

    assert_eq!(groups.len(), buffer.track_ids().len());
    assert!(groups.groups().values().all(|m| m.len() == 1));
}

#[test]
fn test_raising_threshold_never_splits_identities() {
    let buffer = reappearance_buffer();
    let identities: Vec<usize> = [0.0, 100.0, 500.0, 1e6]
        .into_iter()
        .map(|t| {
            let config = FusionConfig::default().with_merge_threshold(t);
            IdentityFuser::new(MeanColor, &config).fuse(&buffer).len()
        })
        .collect();

    assert!(identities.windows(2).all(|w| w[1] <= w[0]), "{identities:?}");
    assert_eq!(identities.first(), Some(&4));
    assert_eq!(identities.last(), Some(&3));
}

#[test]
fn test_empty_buffer_has_no_groups() {
    let groups = fuse(&TrackBuffer::new());
    assert!(groups.is_empty());
    assert!(groups.remap().is_empty());
}

use std::borrow::Cow;

use crate::block::{Block, WorldState};

/// Fixed binary header for host publication. Layout is little-endian and
/// field-for-field stable:
///
/// ```text
/// tag[4] | msg_count | image_count | cols[8] | rows[8] | chans[8] |
/// offsets[8] | point_counts[4] | point_chans[4] | point_offsets[4] |
/// cloud_count | fetch_kind | pose[6] (f32)
/// ```
///
/// All counts and offsets are i32; offsets are absolute from the start of
/// the published buffer, so the first slot begins at `HEADER_LEN`. The
/// packed payload follows the header directly: raw row-major
/// channel-interleaved pixel bytes per image slot, then interleaved f32
/// coordinates (3 per point, 6 with colors) per cloud slot.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketHeader {
    pub msg_count: i32,
    pub image_count: i32,
    pub cols: [i32; MAX_IMAGE_SLOTS],
    pub rows: [i32; MAX_IMAGE_SLOTS],
    pub chans: [i32; MAX_IMAGE_SLOTS],
    pub offsets: [i32; MAX_IMAGE_SLOTS],
    pub point_counts: [i32; MAX_CLOUD_SLOTS],
    pub point_chans: [i32; MAX_CLOUD_SLOTS],
    pub point_offsets: [i32; MAX_CLOUD_SLOTS],
    pub cloud_count: i32,
    pub fetch_kind: i32,
    pub pose: [f32; 6],
}

pub const BUCKET_TAG: [u8; 4] = *b"pch\0";
pub const MAX_IMAGE_SLOTS: usize = 8;
pub const MAX_CLOUD_SLOTS: usize = 4;
pub const HEADER_LEN: usize = 220;

impl Default for BucketHeader {
    fn default() -> Self {
        Self {
            msg_count: 0,
            image_count: 0,
            cols: [0; MAX_IMAGE_SLOTS],
            rows: [0; MAX_IMAGE_SLOTS],
            chans: [0; MAX_IMAGE_SLOTS],
            offsets: [0; MAX_IMAGE_SLOTS],
            point_counts: [0; MAX_CLOUD_SLOTS],
            point_chans: [0; MAX_CLOUD_SLOTS],
            point_offsets: [0; MAX_CLOUD_SLOTS],
            cloud_count: 0,
            fetch_kind: 0,
            pose: [0.0; 6],
        }
    }
}

impl BucketHeader {
    pub fn write_into(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= HEADER_LEN);
        let mut w = Writer { out, at: 0 };
        w.bytes(&BUCKET_TAG);
        w.i32(self.msg_count);
        w.i32(self.image_count);
        w.i32s(&self.cols);
        w.i32s(&self.rows);
        w.i32s(&self.chans);
        w.i32s(&self.offsets);
        w.i32s(&self.point_counts);
        w.i32s(&self.point_chans);
        w.i32s(&self.point_offsets);
        w.i32(self.cloud_count);
        w.i32(self.fetch_kind);
        for v in self.pose {
            w.f32(v);
        }
        debug_assert_eq!(w.at, HEADER_LEN);
    }

    /// Parse a header back out of a published buffer. None if the buffer
    /// is short or the tag does not match.
    pub fn parse(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < HEADER_LEN || buffer[..4] != BUCKET_TAG {
            return None;
        }
        let mut r = Reader { buffer, at: 4 };
        let mut header = BucketHeader {
            msg_count: r.i32(),
            image_count: r.i32(),
            ..Default::default()
        };
        r.i32s(&mut header.cols);
        r.i32s(&mut header.rows);
        r.i32s(&mut header.chans);
        r.i32s(&mut header.offsets);
        r.i32s(&mut header.point_counts);
        r.i32s(&mut header.point_chans);
        r.i32s(&mut header.point_offsets);
        header.cloud_count = r.i32();
        header.fetch_kind = r.i32();
        for v in header.pose.iter_mut() {
            *v = r.f32();
        }
        Some(header)
    }
}

struct Writer<'a> {
    out: &'a mut [u8],
    at: usize,
}

impl Writer<'_> {
    fn bytes(&mut self, bytes: &[u8]) {
        self.out[self.at..self.at + bytes.len()].copy_from_slice(bytes);
        self.at += bytes.len();
    }

    fn i32(&mut self, v: i32) {
        self.bytes(&v.to_le_bytes());
    }

    fn i32s(&mut self, vs: &[i32]) {
        for &v in vs {
            self.i32(v);
        }
    }

    fn f32(&mut self, v: f32) {
        self.bytes(&v.to_le_bytes());
    }
}

struct Reader<'a> {
    buffer: &'a [u8],
    at: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> &[u8] {
        let slice = &self.buffer[self.at..self.at + n];
        self.at += n;
        slice
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take(4).try_into().unwrap())
    }

    fn i32s(&mut self, out: &mut [i32]) {
        for v in out.iter_mut() {
            *v = self.i32();
        }
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take(4).try_into().unwrap())
    }
}

/// Pack publish-flagged outputs and the frame's world state into one
/// bucket buffer: up to 8 image slots and 4 cloud slots, in output-list
/// order; anything beyond the caps or empty is skipped.
pub fn encode(outputs: &[Block], world: &WorldState) -> Vec<u8> {
    let mut header = BucketHeader {
        msg_count: 1,
        ..Default::default()
    };
    let mut payload: Vec<u8> = Vec::new();
    let mut image_count = 0usize;
    let mut cloud_count = 0usize;

    for block in outputs.iter().filter(|b| b.publish) {
        if let Some(points) = &block.points {
            if cloud_count >= MAX_CLOUD_SLOTS || points.is_empty() {
                continue;
            }
            let colors = block.colors.as_deref().filter(|c| c.len() == points.len());
            let chans = if colors.is_some() { 6 } else { 3 };
            header.point_counts[cloud_count] = points.len() as i32;
            header.point_chans[cloud_count] = chans;
            header.point_offsets[cloud_count] = (HEADER_LEN + payload.len()) as i32;
            for (i, point) in points.iter().enumerate() {
                for v in point {
                    payload.extend_from_slice(&v.to_le_bytes());
                }
                if let Some(colors) = colors {
                    for v in &colors[i] {
                        payload.extend_from_slice(&v.to_le_bytes());
                    }
                }
            }
            cloud_count += 1;
        } else {
            if image_count >= MAX_IMAGE_SLOTS {
                continue;
            }
            let (w, h) = (block.image.width(), block.image.height());
            if w == 0 || h == 0 {
                continue;
            }
            let (bytes, chans): (Cow<'_, [u8]>, i32) = match &block.image {
                image::DynamicImage::ImageLuma8(img) => (Cow::Borrowed(img.as_raw()), 1),
                image::DynamicImage::ImageRgb8(img) => (Cow::Borrowed(img.as_raw()), 3),
                other => (Cow::Owned(other.to_rgb8().into_raw()), 3),
            };
            header.cols[image_count] = w as i32;
            header.rows[image_count] = h as i32;
            header.chans[image_count] = chans;
            header.offsets[image_count] = (HEADER_LEN + payload.len()) as i32;
            payload.extend_from_slice(&bytes);
            image_count += 1;
        }
    }

    header.image_count = image_count as i32;
    header.cloud_count = cloud_count as i32;
    header.fetch_kind = world.fetch_kind;
    header.pose = world.pose();

    let mut buffer = vec![0u8; HEADER_LEN + payload.len()];
    header.write_into(&mut buffer);
    buffer[HEADER_LEN..].copy_from_slice(&payload);
    buffer
}

//! Wire-level sequencing of the serializing backend: dependent commands
//! always precede the primary command, batches never interleave.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use mirage_drv::{build_driver_table, BackendConfig, CollectingSink, DeviceContext};
use mirage_protocol::{parse_cmd_stream, DisplayCmd};
use mirage_raster::{BitsPerPixel, PixelFormat, PixelRect, RasterOp};
use mirage_surface::SurfaceMap;

fn remote_dc() -> (DeviceContext, CollectingSink) {
    let sink = CollectingSink::new();
    let registry = build_driver_table(BackendConfig::Remote {
        surfaces: Arc::new(SurfaceMap::new()),
        make_sink: {
            let sink = sink.clone();
            Arc::new(move || Box::new(sink.clone()))
        },
    });
    (DeviceContext::create_dc(Arc::new(registry)), sink)
}

fn batches(sink: &CollectingSink) -> Vec<Vec<DisplayCmd>> {
    sink.drain()
        .iter()
        .map(|s| parse_cmd_stream(s).unwrap())
        .collect()
}

#[test]
fn put_image_batches_carry_source_and_clip_before_the_primary_command() {
    let (mut dc, sink) = remote_dc();

    let format = PixelFormat::new(BitsPerPixel::ThirtyTwo, 16);
    let bits = vec![0xA0u8; 16 * 2];
    let src = PixelRect::new(0, 0, 4, 2);
    let clip = [PixelRect::new(0, 0, 3, 1)];
    dc.put_image(&clip, &format, &bits, &src, &src, RasterOp::SrcCopy as u32);

    let batches = batches(&sink);
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.len(), 3);

    let DisplayCmd::SetSource { image } = &batch[0] else {
        panic!("expected SetSource first, got {:?}", batch[0]);
    };
    // Payload is exactly the packed image: stride times height.
    assert_eq!(image.stride, 16);
    assert_eq!(image.bytes.len(), 16 * 2);

    assert_eq!(
        batch[1],
        DisplayCmd::SetClip {
            rects: clip.to_vec()
        }
    );
    assert!(matches!(batch[2], DisplayCmd::PutImage { .. }));
}

#[test]
fn back_to_back_draws_produce_self_contained_batches() {
    let (mut dc, sink) = remote_dc();

    let format = PixelFormat::new(BitsPerPixel::Eight, 4);
    let bits = vec![0x7Fu8; 4 * 2];
    let src = PixelRect::new(0, 0, 4, 2);
    dc.put_image(&[], &format, &bits, &src, &src, RasterOp::SrcCopy as u32);
    dc.put_image(&[], &format, &bits, &src, &src, RasterOp::SrcPaint as u32);

    let batches = batches(&sink);
    assert_eq!(batches.len(), 2);
    for batch in &batches {
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch[0], DisplayCmd::SetSource { .. }));
        assert!(matches!(batch[1], DisplayCmd::PutImage { .. }));
    }
    let DisplayCmd::PutImage { rop, .. } = &batches[1][1] else {
        unreachable!()
    };
    assert_eq!(*rop, RasterOp::SrcPaint as u32);
}

#[test]
fn device_clip_is_sent_once_until_it_changes() {
    let (mut dc, sink) = remote_dc();

    let clip = [PixelRect::new(1, 1, 5, 5)];
    dc.set_device_clipping(&clip);
    dc.move_to(0, 0);
    dc.line_to(4, 4);
    dc.line_to(6, 6);
    dc.set_device_clipping(&[]);
    dc.line_to(8, 8);

    let batches = batches(&sink);
    assert_eq!(batches.len(), 4);
    assert_eq!(
        batches[0],
        vec![
            DisplayCmd::SetClip {
                rects: clip.to_vec()
            },
            DisplayCmd::MoveTo { x: 0, y: 0 },
        ]
    );
    assert_eq!(batches[1], vec![DisplayCmd::LineTo { x: 4, y: 4 }]);
    assert_eq!(batches[2], vec![DisplayCmd::LineTo { x: 6, y: 6 }]);
    assert_eq!(
        batches[3],
        vec![
            DisplayCmd::SetClip { rects: Vec::new() },
            DisplayCmd::LineTo { x: 8, y: 8 },
        ]
    );
}

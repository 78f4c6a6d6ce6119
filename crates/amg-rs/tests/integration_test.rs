use amg_rs::mask::area;
use amg_rs::{
    area_from_rle, batch_iterator, boxes_xyxy_to_xywh, is_box_near_crop_edge, mask_to_rle,
    rle_to_box_xywh, rle_to_mask, uncrop_boxes_xyxy, uncrop_masks, CropBox, DataLoader, Field,
    LoaderParams, MaskData, Rle,
};
use ndarray::{array, Array1, Array2, Array3, Axis, Ix3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

const ORIG_H: usize = 8;
const ORIG_W: usize = 8;
const ORIG_BOX: CropBox = [0, 0, ORIG_W as i32, ORIG_H as i32];
const ATOL: f32 = 0.5;

/// Masks of size `h x w` with one filled rectangle `(y0, y1, x0, x1)` each.
fn rect_masks(h: usize, w: usize, rects: &[(usize, usize, usize, usize)]) -> Array3<bool> {
    Array3::from_shape_fn((rects.len(), h, w), |(n, y, x)| {
        let (y0, y1, x0, x1) = rects[n];
        (y0..y1).contains(&y) && (x0..x1).contains(&x)
    })
}

/// Drop crop-edge masks, then move the survivors into the original frame.
fn process_crop(
    crop_box: CropBox,
    masks: Array3<bool>,
    boxes: Array2<f32>,
    scores: Array1<f32>,
) -> MaskData {
    let near_edge = is_box_near_crop_edge(boxes.view(), &crop_box, &ORIG_BOX, ATOL)
        .expect("Edge check failed");
    let mut data = MaskData::from_fields([
        ("masks", Field::from(masks)),
        ("boxes", Field::from(boxes)),
        ("scores", Field::from(scores)),
    ])
    .expect("Failed to build crop data");
    data.filter(near_edge.mapv(|f| !f)).expect("Filter failed");

    let masks = data["masks"]
        .as_bool()
        .expect("masks should be a bool array")
        .view()
        .into_dimensionality::<Ix3>()
        .expect("masks should be 3-D");
    let uncropped = uncrop_masks(masks, &crop_box, ORIG_H, ORIG_W).expect("Uncrop masks failed");
    let boxes = data["boxes"]
        .as_float()
        .expect("boxes should be a float array")
        .view()
        .into_dimensionality::<ndarray::Ix2>()
        .expect("boxes should be 2-D");
    let boxes = uncrop_boxes_xyxy(boxes, &crop_box).expect("Uncrop boxes failed");

    data.insert("masks", uncropped).unwrap();
    data.insert("boxes", boxes).unwrap();
    data
}

fn run_pipeline() -> MaskData {
    // Full-image crop: one object in the top-left corner.
    let full = process_crop(
        ORIG_BOX,
        rect_masks(8, 8, &[(0, 2, 0, 3)]),
        array![[0.0, 0.0, 3.0, 2.0]],
        array![0.9],
    );
    // Right-half crop: the first object touches the crop's left edge, which is
    // interior to the image, so it is dropped.
    let right = process_crop(
        [4, 0, 8, 8],
        rect_masks(8, 4, &[(2, 4, 0, 2), (3, 5, 1, 3)]),
        array![[0.0, 2.0, 2.0, 4.0], [1.0, 3.0, 3.0, 5.0]],
        array![0.7, 0.8],
    );

    let mut all = MaskData::new();
    all.cat(&full).expect("Cat failed");
    all.cat(&right).expect("Cat failed");

    // Encode in small chunks the way a generator would after each batch.
    let masks = all
        .remove("masks")
        .expect("masks should be present")
        .as_bool()
        .expect("masks should be a bool array")
        .clone()
        .into_dimensionality::<Ix3>()
        .expect("masks should be 3-D");
    let mut rles: Vec<Rle> = Vec::new();
    for (chunk,) in batch_iterator(1, (masks.view(),)).expect("Batching failed") {
        rles.extend(mask_to_rle(chunk).expect("Encoding failed"));
    }
    all.insert("rles", rles).unwrap();
    all
}

#[test]
fn test_crop_pipeline_keeps_interior_masks() {
    let data = run_pipeline();
    assert_eq!(data.validate().unwrap(), 2);
    assert_eq!(
        data.keys().collect::<Vec<_>>(),
        vec!["boxes", "rles", "scores"]
    );

    let scores = data["scores"].as_float().unwrap();
    assert_eq!(scores.iter().copied().collect::<Vec<f32>>(), vec![0.9, 0.8]);

    let boxes = data["boxes"].as_float().unwrap();
    assert_eq!(
        boxes.iter().copied().collect::<Vec<f32>>(),
        vec![0.0, 0.0, 3.0, 2.0, 5.0, 3.0, 7.0, 5.0]
    );
}

#[test]
fn test_pipeline_rles_agree_with_boxes() {
    let data = run_pipeline();
    let rles = data["rles"].as_rles().expect("rles should be RLE records");
    let boxes = data["boxes"]
        .as_float()
        .unwrap()
        .view()
        .into_dimensionality::<ndarray::Ix2>()
        .unwrap();
    let xywh = boxes_xyxy_to_xywh(boxes).expect("Conversion failed");

    let areas: Vec<u64> = rles.iter().map(|r| area_from_rle(r).unwrap()).collect();
    assert_eq!(areas, vec![6, 4]);

    for (rle, expected) in rles.iter().zip(xywh.axis_iter(Axis(0))) {
        let bbox = rle_to_box_xywh(rle).unwrap();
        assert_eq!(bbox.to_vec(), expected.to_vec());
    }
}

#[test]
fn test_pipeline_json_output() {
    let data = run_pipeline();
    let out = data.to_json();

    assert_eq!(
        out["rles"][0],
        json!({ "size": [8, 8], "counts": [0, 2, 6, 2, 6, 2, 46] })
    );
    // Object at rows 3..5, columns 5..7.
    assert_eq!(
        out["rles"][1],
        json!({ "size": [8, 8], "counts": [43, 2, 6, 2, 11] })
    );

    let back = MaskData::from_json(out).expect("Reload failed");
    assert_eq!(back.validate().unwrap(), 2);
    assert_eq!(back["rles"].as_rles().unwrap().len(), 2);
}

#[test]
fn test_all_masks_on_crop_edge() {
    let data = process_crop(
        [4, 0, 8, 8],
        rect_masks(8, 4, &[(0, 3, 0, 4)]),
        array![[0.0, 0.0, 4.0, 3.0]],
        array![0.5],
    );
    assert_eq!(data.validate().unwrap(), 0);
    assert_eq!(data["masks"].as_bool().unwrap().shape(), &[0, 8, 8]);

    let mut all = run_pipeline();
    let before = all.clone();
    // Appending empty data changes nothing.
    all.cat(&MaskData::new()).unwrap();
    assert_eq!(all, before);
}

#[test]
fn test_ingest_json_then_filter() {
    let mut data = MaskData::from_json(json!({
        "ids": [1, 2, 3],
        "scores": [0.25, 0.5, 1],
        "points": [[[1, 2]], [[3, 4]], [[5, 6]]],
        "rles": [
            { "size": [2, 2], "counts": [0, 4] },
            { "size": [2, 2], "counts": [4] },
            { "size": [2, 2], "counts": [1, 2, 1] }
        ],
        "labels": ["a", "b", "c"]
    }))
    .expect("Ingestion failed");

    assert_eq!(data.validate().unwrap(), 3);
    assert_eq!(data["ids"].kind(), "int array");
    assert_eq!(data["scores"].kind(), "float array");
    assert_eq!(data["points"].as_int().unwrap().shape(), &[3, 1, 2]);

    data.filter(vec![false, true, true]).unwrap();
    let rles = data["rles"].as_rles().unwrap();
    assert_eq!(rles.iter().map(|r| area(r)).collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(data.to_json()["labels"], json!(["b", "c"]));
    assert_eq!(data.to_json()["points"], json!([[[3, 4]], [[5, 6]]]));
}

#[test]
fn test_random_masks_through_loader() {
    let mut rng = StdRng::seed_from_u64(2024);
    let masks: Vec<Array2<bool>> = (0..13)
        .map(|_| Array2::from_shape_fn((6, 5), |_| rng.random_bool(0.35)))
        .collect();

    let params = LoaderParams {
        batch_size: 4,
        shuffle: false,
        num_workers: 2,
        seed: Some(1),
    };
    let mut loader = DataLoader::new(&masks, params).expect("Failed to build loader");
    assert_eq!(loader.len(), 4);

    let mut seen = 0;
    for batch in loader.batches().unwrap() {
        let views: Vec<_> = batch.iter().map(|m| m.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views).unwrap();
        for (mask, rle) in batch.iter().zip(mask_to_rle(stacked.view()).unwrap()) {
            assert_eq!(rle.counts.iter().map(|&c| c as u64).sum::<u64>(), 30);
            assert!(rle.counts[1..].iter().all(|&c| c > 0));
            assert_eq!(area(&rle), mask.iter().filter(|&&v| v).count() as u64);
            assert_eq!(&rle_to_mask(&rle).unwrap(), mask);
        }
        seen += batch.len();
    }
    assert_eq!(seen, 13);
}

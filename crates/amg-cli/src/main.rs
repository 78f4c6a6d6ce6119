use std::error::Error;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use amg_rs::{
    area_from_rle, batch_iterator, boxes_xyxy_to_xywh, is_box_near_crop_edge, mask_to_rle,
    rle_to_mask, uncrop_boxes_xyxy, uncrop_masks, ArrayField, CropBox, Field, MaskData, Params,
    Rle,
};
use clap::{Parser, Subcommand};
use ndarray::{Array1, Array2, Array3, ArrayD, Ix1, Ix2, Ix3};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "amg-rle")]
#[command(about = "Encode, decode and post-process per-object segmentation masks as COCO RLE")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode an (N, h, w) array of 0/1 or bool masks into a list of RLE records
    Encode {
        #[arg(long)]
        input: PathBuf,
        /// Write JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Decode a list of RLE records into nested 0/1 masks
    Decode {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the foreground area of each RLE record, one per line
    Area {
        #[arg(long)]
        input: PathBuf,
    },
    /// Filter, uncrop and merge per-crop detections, then encode the masks
    Postprocess {
        #[arg(long)]
        input: PathBuf,
        /// JSON parameters; missing keys take their defaults
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Detections produced on one crop of the original image.
#[derive(Debug, Deserialize)]
struct CropInput {
    crop_box: CropBox,
    masks: Value,
    /// Crop-local `xyxy`.
    boxes: Vec<[f32; 4]>,
    scores: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct PostprocessInput {
    /// `[h, w]`
    orig_size: [usize; 2],
    crops: Vec<CropInput>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Record {
    segmentation: Rle,
    area: u64,
    /// `xywh` in original-image coordinates.
    bbox: [f32; 4],
    score: f32,
    crop_box: CropBox,
}

fn read_json(path: &Path) -> CliResult<Value> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json(value: &impl Serialize, output: Option<&Path>) -> CliResult<()> {
    match output {
        Some(path) => {
            let mut writer = BufWriter::new(fs::File::create(path)?);
            serde_json::to_writer(&mut writer, value)?;
            writer.flush()?;
            info!("wrote {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer(&mut lock, value)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}

/// Parse nested 0/1 or bool masks into an `(N, h, w)` array.
///
/// An empty list yields `N = 0` with the given `(h, w)`.
fn masks_from_json(value: Value, empty_hw: (usize, usize)) -> CliResult<Array3<bool>> {
    let masks: ArrayD<bool> = match Field::from_json("masks", value)? {
        Field::Array(ArrayField::Bool(a)) => a,
        Field::Array(ArrayField::Int(a)) => a.mapv(|v| v != 0),
        Field::Array(ArrayField::Float(a)) => a.mapv(|v| v != 0.0),
        Field::Sequence(items) if items.is_empty() => {
            return Ok(Array3::from_elem((0, empty_hw.0, empty_hw.1), false));
        }
        Field::Sequence(_) => return Err("masks must be a rectangular (N, h, w) array".into()),
    };
    masks
        .into_dimensionality::<Ix3>()
        .map_err(|_| "masks must have exactly three dimensions (N, h, w)".into())
}

/// Decode one RLE into rows of 0/1.
fn mask_rows(rle: &Rle) -> CliResult<Vec<Vec<u8>>> {
    let mask = rle_to_mask(rle)?;
    Ok(mask
        .outer_iter()
        .map(|row| row.iter().map(|&v| u8::from(v)).collect())
        .collect())
}

fn encode_chunked(masks: &Array3<bool>, chunk: usize) -> CliResult<Vec<Rle>> {
    let mut rles = Vec::with_capacity(masks.dim().0);
    for (batch,) in batch_iterator(chunk, (masks.view(),))? {
        rles.extend(mask_to_rle(batch)?);
    }
    Ok(rles)
}

fn load_params(config: Option<&Path>) -> CliResult<Params> {
    let Some(path) = config else {
        return Ok(Params::default());
    };
    let params: Params = serde_json::from_value(read_json(path)?)?;
    if params.batch_size == 0 {
        return Err("batch_size must be at least 1".into());
    }
    Ok(params)
}

/// Drop detections touching an interior crop edge and move the rest into the
/// original frame.
fn process_crop(
    crop: CropInput,
    orig_box: &CropBox,
    orig_h: usize,
    orig_w: usize,
    params: &Params,
) -> CliResult<MaskData> {
    let [x0, y0, x1, y1] = crop.crop_box;
    let crop_hw = (
        y1.saturating_sub(y0).max(0) as usize,
        x1.saturating_sub(x0).max(0) as usize,
    );
    let masks = masks_from_json(crop.masks, crop_hw)?;
    let n = crop.boxes.len();
    let boxes = Array2::from_shape_vec((n, 4), crop.boxes.concat())?;
    let crop_boxes = Array2::from_shape_fn((n, 4), |(_, j)| crop.crop_box[j] as i64);

    let near_edge =
        is_box_near_crop_edge(boxes.view(), &crop.crop_box, orig_box, params.crop_edge_atol)?;
    let mut data = MaskData::from_fields([
        ("masks", Field::from(masks)),
        ("boxes", Field::from(boxes)),
        ("scores", Field::from(Array1::from(crop.scores))),
        ("crop_boxes", Field::from(crop_boxes)),
    ])?;
    data.filter(near_edge.mapv(|near| !near))?;

    let masks = match data.get("masks").and_then(Field::as_bool) {
        Some(m) => uncrop_masks(
            m.view().into_dimensionality::<Ix3>()?,
            &crop.crop_box,
            orig_h,
            orig_w,
        )?,
        None => return Err("masks field lost its type".into()),
    };
    let boxes = match data.get("boxes").and_then(Field::as_float) {
        Some(b) => uncrop_boxes_xyxy(b.view().into_dimensionality::<Ix2>()?, &crop.crop_box)?,
        None => return Err("boxes field lost its type".into()),
    };
    data.insert("masks", masks)?;
    data.insert("boxes", boxes)?;
    let kept = data.validate()?;
    debug!(crop = ?crop.crop_box, kept, of = n, "processed crop");
    Ok(data)
}

fn postprocess(input: PostprocessInput, params: &Params) -> CliResult<Vec<Record>> {
    let [orig_h, orig_w] = input.orig_size;
    let orig_box: CropBox = [0, 0, orig_w as i32, orig_h as i32];

    let mut all = MaskData::new();
    for crop in input.crops {
        let data = process_crop(crop, &orig_box, orig_h, orig_w, params)?;
        all.cat(&data)?;
    }
    if all.validate()? == 0 {
        return Ok(Vec::new());
    }

    let masks = match all.remove("masks") {
        Some(Field::Array(ArrayField::Bool(m))) => m.into_dimensionality::<Ix3>()?,
        _ => return Err("merged masks are missing".into()),
    };
    let rles = encode_chunked(&masks, params.batch_size)?;

    let (Some(boxes), Some(scores), Some(crop_boxes)) = (
        all.get("boxes").and_then(Field::as_float),
        all.get("scores").and_then(Field::as_float),
        all.get("crop_boxes").and_then(Field::as_int),
    ) else {
        return Err("merged detections are missing fields".into());
    };
    let bboxes = boxes_xyxy_to_xywh(boxes.view().into_dimensionality::<Ix2>()?)?;
    let scores = scores.view().into_dimensionality::<Ix1>()?;
    let crop_boxes = crop_boxes.view().into_dimensionality::<Ix2>()?;

    let mut records = Vec::with_capacity(rles.len());
    for (i, rle) in rles.into_iter().enumerate() {
        let cb = crop_boxes.row(i);
        records.push(Record {
            area: area_from_rle(&rle)?,
            segmentation: rle,
            bbox: [bboxes[[i, 0]], bboxes[[i, 1]], bboxes[[i, 2]], bboxes[[i, 3]]],
            score: scores[i],
            crop_box: [cb[0] as i32, cb[1] as i32, cb[2] as i32, cb[3] as i32],
        });
    }
    Ok(records)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Encode { input, output } => {
            let masks = masks_from_json(read_json(&input)?, (0, 0))?;
            info!("encoding {} masks of size {:?}", masks.dim().0, &masks.shape()[1..]);
            let rles = mask_to_rle(masks.view())?;
            write_json(&rles, output.as_deref())?;
        }
        Command::Decode { input, output } => {
            let rles: Vec<Rle> = serde_json::from_value(read_json(&input)?)?;
            info!("decoding {} RLE records", rles.len());
            let masks = rles
                .iter()
                .map(mask_rows)
                .collect::<CliResult<Vec<_>>>()?;
            write_json(&masks, output.as_deref())?;
        }
        Command::Area { input } => {
            let rles: Vec<Rle> = serde_json::from_value(read_json(&input)?)?;
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            for rle in &rles {
                writeln!(lock, "{}", area_from_rle(rle)?)?;
            }
        }
        Command::Postprocess {
            input,
            config,
            output,
        } => {
            let params = load_params(config.as_deref())?;
            let input: PostprocessInput = serde_json::from_value(read_json(&input)?)?;
            info!(
                "post-processing {} crops of a {}x{} image",
                input.crops.len(),
                input.orig_size[0],
                input.orig_size[1]
            );
            let records = postprocess(input, &params)?;
            info!("kept {} masks", records.len());
            write_json(&records, output.as_deref())?;
        }
    }

    Ok(())
}

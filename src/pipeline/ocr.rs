//! Batch OCR dispatch: crops → numbered multi-image requests → LaTeX.
//!
//! ## Batching
//!
//! One request per formula would spend most of its time on round trips.
//! Instead crops are grouped into batches of `batch_size` images, each sent
//! as a single message whose prompt asks for `<n>: <latex>` lines. Batches
//! run concurrently, at most `max_workers` in flight.
//!
//! ## Failure isolation
//!
//! Every batch resolves to its own `Result`. A failed batch (transport
//! error, HTTP status, unparseable body) is logged and contributes nothing;
//! sibling batches keep running and their results are kept. The join is
//! "collect all outcomes", never "fail fast".

use crate::client::{LabeledImage, OcrClient, OcrRequest};
use crate::config::FormulaOcrConfig;
use crate::formula::FormulaRegion;
use crate::pipeline::crop::crop_formula_image;
use crate::pipeline::encode::encode_crop;
use crate::prompts::{batch_prompt, image_label, UNREADABLE_MARKER};
use edgequake_llm::ImageData;
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

static RE_NUMBERED_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)[:.]\s*(.+)$").unwrap());
static RE_DOLLAR_EDGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$+|\$+$").unwrap());

/// OCR every region whose page image is available and fill in its `latex`.
///
/// Returns `regions` untouched, without any network call, when the list is
/// empty or the config carries no credential.
pub async fn ocr_formulas(
    mut regions: Vec<FormulaRegion>,
    page_images: &HashMap<usize, DynamicImage>,
    config: &FormulaOcrConfig,
    client: &dyn OcrClient,
) -> Vec<FormulaRegion> {
    if regions.is_empty() || !config.has_credential() {
        return regions;
    }

    let crops = prepare_crops(&regions, page_images, config);
    info!(
        "Sending {} formula images to {} in batches of {}",
        crops.len(),
        config.model,
        config.batch_size
    );

    let results = dispatch_batches(crops, config, client).await;
    for (idx, latex) in results {
        if let Some(region) = regions.get_mut(idx) {
            region.latex = latex;
        }
    }
    regions
}

/// Crop and encode every region whose page was rendered.
///
/// Returns `(region_index, image)` pairs in region order. A crop that fails
/// to encode is skipped with a warning.
pub fn prepare_crops(
    regions: &[FormulaRegion],
    page_images: &HashMap<usize, DynamicImage>,
    config: &FormulaOcrConfig,
) -> Vec<(usize, ImageData)> {
    regions
        .iter()
        .enumerate()
        .filter_map(|(idx, region)| {
            let page = page_images.get(&region.page_index)?;
            let crop = crop_formula_image(page, &region.bbox, config.render_dpi, config.crop_padding);
            match encode_crop(crop) {
                Ok(data) => Some((idx, data)),
                Err(e) => {
                    warn!(
                        "Skipping formula {:?} on page {}: {}",
                        region.raw_chars,
                        region.page_index + 1,
                        e
                    );
                    None
                }
            }
        })
        .collect()
}

/// Send indexed images in concurrent batches and collect index → LaTeX.
///
/// Issues exactly `ceil(images.len() / batch_size)` requests.
pub async fn dispatch_batches(
    images: Vec<(usize, ImageData)>,
    config: &FormulaOcrConfig,
    client: &dyn OcrClient,
) -> HashMap<usize, String> {
    let mut results = HashMap::new();
    if images.is_empty() {
        return results;
    }

    let batches: Vec<&[(usize, ImageData)]> = images.chunks(config.batch_size.max(1)).collect();
    let total = batches.len();
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_ocr_start(images.len(), total);
    }

    let mut outcomes = stream::iter(batches.into_iter().enumerate().map(|(i, batch)| async move {
        let request = build_request(batch, config);
        let outcome = client
            .complete(&request)
            .await
            .map(|text| map_to_regions(&text, batch));
        (i + 1, outcome)
    }))
    .buffer_unordered(config.max_workers.max(1));

    let mut completed = 0;
    let mut failed = 0;
    while let Some((batch_no, outcome)) = outcomes.next().await {
        completed += 1;
        match outcome {
            Ok(batch_results) => {
                debug!("Batch {}/{}: {} formulas recognised", batch_no, total, batch_results.len());
                if let Some(ref cb) = config.progress_callback {
                    cb.on_batch_complete(batch_no, total, batch_results.len());
                }
                results.extend(batch_results);
            }
            Err(e) => {
                failed += 1;
                warn!("OCR batch {}/{} failed: {}", batch_no, total, e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_batch_error(batch_no, total, &e.to_string());
                }
            }
        }
        if completed % 5 == 0 || completed == total {
            info!("OCR progress: {} / {} batches", completed, total);
        }
    }

    info!(
        "OCR finished: {} formulas from {} batches ({} failed) in {}ms",
        results.len(),
        total,
        failed,
        start.elapsed().as_millis()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_ocr_complete(total, failed);
    }
    results
}

/// Build the request for one batch: prompt, then a labelled image per crop.
pub fn build_request(batch: &[(usize, ImageData)], config: &FormulaOcrConfig) -> OcrRequest {
    OcrRequest {
        model: config.model.clone(),
        prompt: batch_prompt(batch.len()),
        images: batch
            .iter()
            .enumerate()
            .map(|(i, (_, image))| LabeledImage {
                label: image_label(i + 1),
                image: image.clone(),
            })
            .collect(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

/// Parse `<n>: <latex>` lines into `(n, latex)` pairs with `1 <= n <= batch_len`.
///
/// Accepts `:` or `.` after the number, strips stray `$` delimiters, and
/// ignores blank, unreadable (`???`), unnumbered and out-of-range lines.
pub fn parse_numbered_response(text: &str, batch_len: usize) -> Vec<(usize, String)> {
    text.lines()
        .filter_map(|line| {
            let caps = RE_NUMBERED_LINE.captures(line.trim())?;
            let seq: usize = caps[1].parse().ok()?;
            if seq == 0 || seq > batch_len {
                return None;
            }
            let latex = caps[2].trim();
            if latex == UNREADABLE_MARKER {
                return None;
            }
            let latex = RE_DOLLAR_EDGES.replace_all(latex, "").trim().to_string();
            if latex.is_empty() {
                None
            } else {
                Some((seq, latex))
            }
        })
        .collect()
}

/// Map a batch's parsed lines back to region indices.
fn map_to_regions(text: &str, batch: &[(usize, ImageData)]) -> HashMap<usize, String> {
    parse_numbered_response(text, batch.len())
        .into_iter()
        .map(|(seq, latex)| (batch[seq - 1].0, latex))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormulaError;
    use crate::layout::BBox;
    use futures::future::BoxFuture;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers `<n>: f<region>` for every image; fails the configured call.
    struct ScriptedClient {
        calls: AtomicUsize,
        fail_call: Option<usize>,
        seen_sizes: Mutex<Vec<usize>>,
    }

    impl ScriptedClient {
        fn new(fail_call: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_call,
                seen_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    impl OcrClient for ScriptedClient {
        fn complete<'a>(&'a self, request: &'a OcrRequest) -> BoxFuture<'a, Result<String, FormulaError>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                self.seen_sizes.lock().unwrap().push(request.images.len());
                if Some(call) == self.fail_call {
                    return Err(FormulaError::OcrStatus {
                        status: 500,
                        body: "upstream error".into(),
                    });
                }
                Ok(request
                    .images
                    .iter()
                    .enumerate()
                    .map(|(i, img)| format!("{}: {}", i + 1, img.image.data))
                    .collect::<Vec<_>>()
                    .join("\n"))
            })
        }
    }

    fn images(n: usize) -> Vec<(usize, ImageData)> {
        (0..n)
            .map(|i| (i, ImageData::new(format!("f{i}"), "image/png")))
            .collect()
    }

    fn config(batch_size: usize, key: &str) -> FormulaOcrConfig {
        FormulaOcrConfig::builder()
            .api_key(key)
            .batch_size(batch_size)
            .max_workers(3)
            .build()
            .unwrap()
    }

    #[test]
    fn parses_colon_and_dot_separators() {
        let parsed = parse_numbered_response("1: x^2\n2. \\alpha + 1\n", 2);
        assert_eq!(parsed, vec![(1, "x^2".to_string()), (2, "\\alpha + 1".to_string())]);
    }

    #[test]
    fn strips_dollar_delimiters() {
        let parsed = parse_numbered_response("1: $$x^2$$\n2: $y$", 2);
        assert_eq!(parsed, vec![(1, "x^2".to_string()), (2, "y".to_string())]);
    }

    #[test]
    fn ignores_unreadable_noise_and_out_of_range() {
        let text = "Here you go:\n```\n1: ???\n2: a+b\n\n0: zero\n9: nine\nlatex: x\n```";
        assert_eq!(parse_numbered_response(text, 3), vec![(2, "a+b".to_string())]);
    }

    #[test]
    fn ignores_huge_numbers() {
        assert!(parse_numbered_response("99999999999999999999999: x", 3).is_empty());
    }

    #[test]
    fn build_request_labels_in_batch_order() {
        let batch = images(3);
        let req = build_request(&batch, &config(30, "k"));
        assert_eq!(req.images.len(), 3);
        assert_eq!(req.images[0].label, "Image 1:");
        assert_eq!(req.images[2].label, "Image 3:");
        assert_eq!(req.temperature, 0.0);
        assert!(req.prompt.contains("3 numbered images"));
    }

    #[tokio::test]
    async fn issues_one_request_per_batch() {
        let client = ScriptedClient::new(None);
        let results = dispatch_batches(images(7), &config(3, "k"), &client).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        let mut sizes = client.seen_sizes.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 3, 3]);
        assert_eq!(results.len(), 7);
        assert_eq!(results[&5], "f5");
    }

    #[tokio::test]
    async fn failed_batch_does_not_block_others() {
        let client = ScriptedClient::new(Some(2));
        let cfg = FormulaOcrConfig::builder()
            .api_key("k")
            .batch_size(2)
            .max_workers(1)
            .build()
            .unwrap();
        let results = dispatch_batches(images(6), &cfg, &client).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        // Sequential worker: the second batch (indices 2, 3) failed.
        assert_eq!(results.len(), 4);
        assert!(!results.contains_key(&2));
        assert!(!results.contains_key(&3));
        assert_eq!(results[&4], "f4");
    }

    #[tokio::test]
    async fn no_credential_is_a_noop() {
        let client = ScriptedClient::new(None);
        let region = FormulaRegion::new(0, BBox::new(0.0, 0.0, 10.0, 10.0), false, Vec::new());
        let mut pages = HashMap::new();
        pages.insert(0, DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]))));

        let out = ocr_formulas(vec![region.clone(), region], &pages, &config(30, ""), &client).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(out.iter().all(|r| r.latex.is_empty()));
    }

    #[tokio::test]
    async fn regions_without_rendered_page_are_skipped() {
        struct Echo;
        impl OcrClient for Echo {
            fn complete<'a>(&'a self, request: &'a OcrRequest) -> BoxFuture<'a, Result<String, FormulaError>> {
                Box::pin(async move {
                    Ok((1..=request.images.len())
                        .map(|n| format!("{n}: x_{n}"))
                        .collect::<Vec<_>>()
                        .join("\n"))
                })
            }
        }

        let bbox = BBox::new(0.0, 0.0, 10.0, 10.0);
        let regions = vec![
            FormulaRegion::new(0, bbox, false, Vec::new()),
            FormulaRegion::new(1, bbox, false, Vec::new()),
            FormulaRegion::new(0, bbox, false, Vec::new()),
        ];
        let mut pages = HashMap::new();
        pages.insert(0, DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]))));

        let out = ocr_formulas(regions, &pages, &config(30, "k"), &Echo).await;
        assert_eq!(out[0].latex, "x_1");
        assert_eq!(out[1].latex, "");
        assert_eq!(out[2].latex, "x_2");
    }
}

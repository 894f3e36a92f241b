use std::path::{Path, PathBuf};
use tracing::{error, info, instrument};
use url::Url;

use crate::fetcher::PageFetcher;
use crate::llm::Extractor;
use crate::normalizer::Normalizer;
use crate::persist::{self, Formatted};
use crate::schema::{ContainerSchema, RecordSchema};
use crate::types::{RunOutput, SkippedUrl, UrlResult};
use crate::{Result, ScraperError};

/// The `Pipeline` drives fetch → normalize → save raw → extract → save formatted for
/// each URL of a batch, one URL at a time.
pub struct Pipeline {
    fetcher: Box<dyn PageFetcher>,
    normalizer: Normalizer,
    extractor: Extractor,
    output_root: PathBuf,
}

impl Pipeline {
    /// Creates a new `Pipeline`.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Renders pages.
    /// * `extractor` - Calls the configured model.
    /// * `output_root` - The directory under which the run folder is created.
    pub fn new(
        fetcher: Box<dyn PageFetcher>,
        extractor: Extractor,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            normalizer: Normalizer::default(),
            extractor,
            output_root: output_root.into(),
        }
    }

    /// Processes every URL in order and collects what succeeded.
    ///
    /// Only an empty URL list, an invalid field list, or an unwritable output root can
    /// fail the whole batch. A failure on one URL, including a malformed URL, is logged
    /// and recorded in `skipped`; later URLs still run.
    ///
    /// # Arguments
    ///
    /// * `urls` - The pages to scrape, in order.
    /// * `fields` - The field names every record must carry.
    /// * `on_progress` - Called with the 1-based index and URL before each page.
    #[instrument(skip_all, fields(url_count = urls.len(), field_count = fields.len()))]
    pub async fn run_batch(
        &mut self,
        urls: &[String],
        fields: &[String],
        mut on_progress: impl FnMut(usize, &str) + Send,
    ) -> Result<RunOutput> {
        let first = urls
            .first()
            .ok_or_else(|| ScraperError::InvalidInput("Please enter at least one URL.".into()))?;
        // Validated up front; rebuilt per URL below.
        RecordSchema::build(fields)?;

        let output_dir = persist::create_run_folder(&self.output_root, first)?;
        info!("Run output folder: {}", output_dir.display());

        let mut output = RunOutput {
            output_dir,
            results: Vec::new(),
            skipped: Vec::new(),
        };

        for (i, url) in urls.iter().enumerate() {
            let index = i + 1;
            on_progress(index, url);

            match self.process_url(index, url, fields, &output.output_dir).await {
                Ok(result) => output.results.push(result),
                Err(e) => {
                    error!("An error occurred while processing {}: {}", url, e);
                    output.skipped.push(SkippedUrl {
                        index,
                        url: url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = self.fetcher.close().await {
            error!("Failed to release browser session: {}", e);
        }

        info!(
            "Completed: {} of {} pages extracted",
            output.results.len(),
            urls.len()
        );
        Ok(output)
    }

    async fn process_url(
        &mut self,
        index: usize,
        url: &str,
        fields: &[String],
        folder: &Path,
    ) -> Result<UrlResult> {
        Url::parse(url)
            .map_err(|e| ScraperError::InvalidInput(format!("invalid URL {}: {}", url, e)))?;
        let html = self.fetcher.fetch(url).await?;
        let markdown = self.normalizer.normalize(&html);
        let raw_path = persist::save_raw(&markdown, folder, &format!("rawData_{}", index))?;

        let schema = ContainerSchema::wrap(RecordSchema::build(fields)?);
        let extraction = self.extractor.extract(&markdown, &schema).await?;

        let saved = persist::save_formatted(
            Formatted::Text(&extraction.raw_json),
            folder,
            &format!("sorted_data_{}.json", index),
            &format!("sorted_data_{}.xlsx", index),
        )?;

        Ok(UrlResult {
            index,
            url: url.to_string(),
            raw_path,
            json_path: saved.json_path,
            xlsx_path: saved.xlsx_path,
            extraction,
        })
    }
}

use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::export;
use crate::llm::ModelId;
use crate::persist::Table;
use crate::pipeline::Pipeline;
use crate::schema::RecordSchema;
use crate::types::{ExtractedData, RunOutput};
use crate::{Result, ScraperError};

/// Where the user is in the scrape workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    Idle,
    Scraping(ScrapeRequest),
    Completed,
}

/// A validated request waiting to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub urls: Vec<String>,
    pub fields: Vec<String>,
    pub model: ModelId,
}

/// The `App` owns the UI state and the results of the last completed run.
pub struct App {
    state: AppState,
    message: Option<String>,
    results: Option<RunOutput>,
    show_spinner: bool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            state: AppState::Idle,
            message: None,
            results: None,
            show_spinner: true,
        }
    }

    /// Disables the busy indicator, for non-interactive use.
    pub fn without_spinner(mut self) -> Self {
        self.show_spinner = false;
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The last validation message, if the last submission was rejected.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn results(&self) -> Option<&RunOutput> {
        self.results.as_ref()
    }

    /// Validates the inputs and moves `Idle → Scraping`.
    ///
    /// URLs are split on whitespace. With no URL, no field, or a repeated field the app
    /// stays `Idle` and the validation message is returned. Submitting outside `Idle` is ignored.
    pub fn submit(
        &mut self,
        url_input: &str,
        fields: &[String],
        model: ModelId,
    ) -> std::result::Result<(), String> {
        if self.state != AppState::Idle {
            return Err("A scrape is already in progress or completed; reset first.".into());
        }

        let urls: Vec<String> = url_input.split_whitespace().map(String::from).collect();
        let fields: Vec<String> = fields
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        let rejection = if urls.is_empty() {
            Some("Please enter at least one URL.".to_string())
        } else if fields.is_empty() {
            Some("Please enter at least one field to extract.".to_string())
        } else {
            match RecordSchema::build(&fields) {
                Ok(_) => None,
                Err(ScraperError::InvalidInput(message)) => Some(message),
                Err(e) => Some(e.to_string()),
            }
        };

        if let Some(message) = rejection {
            self.message = Some(message.clone());
            return Err(message);
        }

        self.message = None;
        self.state = AppState::Scraping(ScrapeRequest {
            urls,
            fields,
            model,
        });
        Ok(())
    }

    /// Runs the pending request and moves `Scraping → Completed` once the batch returns.
    ///
    /// Does nothing unless the app is `Scraping`. A batch-level error (no URLs,
    /// unwritable output folder) still completes the run, with no results and the
    /// error kept as the message.
    pub async fn run(&mut self, pipeline: &mut Pipeline) -> Result<()> {
        let request = match &self.state {
            AppState::Scraping(request) => request.clone(),
            _ => return Ok(()),
        };

        let spinner = self.spinner(request.urls.len());
        let total = request.urls.len();
        let outcome = pipeline
            .run_batch(&request.urls, &request.fields, |index, url| {
                spinner.set_message(format!("Scraping {}/{}: {}", index, total, url));
            })
            .await;

        self.state = AppState::Completed;
        match outcome {
            Ok(output) => {
                spinner.finish_with_message(format!(
                    "Completed: {} of {} pages scraped successfully",
                    output.results.len(),
                    total
                ));
                info!("Scraping completed. Results saved in {}", output.output_dir.display());
                self.results = Some(output);
                Ok(())
            }
            Err(e) => {
                spinner.abandon_with_message(format!("Scraping failed: {}", e));
                warn!("Batch failed: {}", e);
                self.message = Some(e.to_string());
                self.results = None;
                Err(e)
            }
        }
    }

    /// Discards results and returns to `Idle`.
    pub fn reset(&mut self) {
        self.state = AppState::Idle;
        self.results = None;
        self.message = None;
    }

    /// One text table per successful URL.
    pub fn render_tables(&self) -> Vec<String> {
        let Some(output) = &self.results else {
            return Vec::new();
        };

        output
            .results
            .iter()
            .map(|result| {
                let heading = format!("URL {}: {}", result.index, result.url);
                let body = match &result.extraction.data {
                    ExtractedData::Unparsed(_) => {
                        format!("Failed to parse data as JSON for URL {}", result.index)
                    }
                    data => match Table::from_records(&data.records()) {
                        Ok(table) => render_table(&table),
                        Err(e) => format!("Unexpected data format for URL {}: {}", result.index, e),
                    },
                };
                format!("{}\n{}", heading, body)
            })
            .collect()
    }

    /// The combined JSON export, once completed.
    pub fn export_json(&self) -> Option<Result<String>> {
        self.completed_output().map(export::combined_json)
    }

    /// The combined CSV export, once completed.
    pub fn export_csv(&self) -> Option<Result<String>> {
        self.completed_output().map(export::combined_csv)
    }

    /// Writes both combined exports into `dir`, once completed.
    pub fn write_exports(&self, dir: &Path) -> Option<Result<(std::path::PathBuf, std::path::PathBuf)>> {
        self.completed_output().map(|output| export::write_exports(output, dir))
    }

    fn completed_output(&self) -> Option<&RunOutput> {
        match self.state {
            AppState::Completed => self.results.as_ref(),
            _ => None,
        }
    }

    fn spinner(&self, total: usize) -> ProgressBar {
        if !self.show_spinner {
            return ProgressBar::hidden();
        }

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message(format!("Scraping in progress... (0/{})", total));
        spinner
    }
}

/// Left-aligned columns separated by ` | `, with a rule under the header.
pub fn render_table(table: &Table) -> String {
    if table.columns.is_empty() {
        return "(no records)".to_string();
    }

    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            table
                .rows
                .iter()
                .map(|row| row.get(i).map_or(0, |c| c.chars().count()))
                .chain(std::iter::once(column.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![line(&table.columns)];
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    lines.extend(table.rows.iter().map(|row| line(row)));
    lines.join("\n")
}

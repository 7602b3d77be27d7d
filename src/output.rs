use crate::context::RequestContext;
use crate::models::OutputLang;
use crate::services::TranslationService;
use crate::warnings::Warning;
use crate::Result;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    index: usize,
    drug_id: &'a str,
    drug_model: &'a str,
    status: &'a str,
    adjustment_time: String,
    window_start: String,
    window_end: String,
    error: &'a str,
}

#[derive(Debug, Serialize)]
struct WarningRow<'a> {
    index: usize,
    source: &'a str,
    id: String,
    message: String,
}

pub struct OutputManager;

impl OutputManager {
    pub fn save_results<P: AsRef<Path>>(
        contexts: &[RequestContext],
        translations: &dyn TranslationService,
        output_path: P,
    ) -> Result<()> {
        let output_dir = output_path.as_ref();
        fs::create_dir_all(output_dir)?;

        // Complete request results
        let file = File::create(output_dir.join("request_results.json"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), contexts)?;

        Self::save_summary(contexts, output_dir)?;
        Self::save_warnings(contexts, translations, output_dir)?;

        log::info!("Results saved to: {}", output_dir.display());
        Ok(())
    }

    fn save_summary(contexts: &[RequestContext], output_dir: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(output_dir.join("summary.csv"))?;

        for (index, ctx) in contexts.iter().enumerate() {
            let adjustment = ctx.adjustment_trait();
            let format_time = |time: Option<crate::models::DateTime>| time.map_or("NA".to_string(), |t| t.to_string());

            writer.serialize(SummaryRow {
                index,
                drug_id: &ctx.request().drug_id,
                drug_model: ctx.drug_model().map_or("NA", |model| model.id.as_str()),
                status: if ctx.should_continue_processing() { "OK" } else { "FAILED" },
                adjustment_time: format_time(adjustment.map(|a| a.adjustment_time)),
                window_start: format_time(adjustment.map(|a| a.start)),
                window_end: format_time(adjustment.map(|a| a.end)),
                error: ctx.error(),
            })?;
        }

        writer.flush()?;
        Ok(())
    }

    fn save_warnings(
        contexts: &[RequestContext],
        translations: &dyn TranslationService,
        output_dir: &Path,
    ) -> Result<()> {
        let mut writer = csv::Writer::from_path(output_dir.join("warnings.csv"))?;

        for (index, ctx) in contexts.iter().enumerate() {
            let lang = ctx.request().output_lang;

            for result in ctx.covariate_results() {
                if let Some(warning) = &result.warning {
                    writer.serialize(WarningRow {
                        index,
                        source: "covariate",
                        id: result.definition_id.clone(),
                        message: Self::render_warning(warning, translations, lang),
                    })?;
                }
            }
            for (dose_id, result) in ctx.dose_results() {
                if let Some(warning) = &result.warning {
                    writer.serialize(WarningRow {
                        index,
                        source: "dose",
                        id: dose_id.0.to_string(),
                        message: Self::render_warning(warning, translations, lang),
                    })?;
                }
            }
        }

        writer.flush()?;
        Ok(())
    }

    /// Localized warning text, falling back to English when the dictionary
    /// has no entry.
    pub fn render_warning(warning: &Warning, translations: &dyn TranslationService, lang: OutputLang) -> String {
        let text = translations
            .translate(warning.translation_key(), lang)
            .unwrap_or_else(|| warning.english_text().to_string());
        format!("{} {}", text, warning.detail())
    }
}

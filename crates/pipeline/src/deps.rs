use std::sync::Arc;

use folio_core::ocr::{PageRenderer, TesseractCli, TextRecognizer};
use folio_core::pdf::{PdfConcatenator, QpdfCli};
use folio_core::storage::ObjectStore;

use crate::config::PipelineConfig;

/// Collaborators shared by every pipeline task.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<ObjectStore>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub renderer: Arc<dyn PageRenderer>,
    pub concatenator: Arc<dyn PdfConcatenator>,
    pub config: PipelineConfig,
}

impl PipelineDeps {
    /// Wire the pipeline to the `tesseract` and `qpdf` binaries.
    pub fn with_system_tools(store: Arc<ObjectStore>, config: PipelineConfig) -> Self {
        let tesseract = Arc::new(TesseractCli::from_env());
        Self {
            store,
            recognizer: tesseract.clone(),
            renderer: tesseract,
            concatenator: Arc::new(QpdfCli::from_env()),
            config,
        }
    }
}

pub mod batch; // Bulk inference: chunk, submit, poll, reconcile
pub mod dataset; // Fine-tuning train/validation files
pub mod openai; // HTTP BatchApi
pub mod prompt_templates;
pub mod render; // PDF first page -> PNG
pub mod source; // Input JSON + document preparation

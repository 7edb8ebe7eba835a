//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use docbot::bot::{BotSettings, ChatBot};
use docbot::chunk::ChunkParams;
use docbot::config::GenerationConfig;
use docbot::embedding::EmbeddingProvider;
use docbot::error::{RagError, Result};
use docbot::generate::{AnswerGenerator, GenerationOptions, LanguageModel, ResponseSchema};
use docbot::index::{EmbeddingIndex, FlatIndex};
use docbot::prompt::PromptBuilder;

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercased word lands in a SHA-256 bucket,
/// and the result is L2-normalized.
pub struct HashEmbedder;

fn bucket(word: &str) -> usize {
    let digest = Sha256::digest(word.as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(first) % DIMS as u64) as usize
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        v[bucket(&word.to_lowercase())] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

/// A language model that replays a fixed reply and records every prompt.
pub struct ScriptedModel {
    reply: Mutex<std::result::Result<String, String>>,
    pub prompts: Mutex<Vec<String>>,
    pub options: Mutex<Vec<GenerationOptions>>,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(Ok(reply.to_string())),
            prompts: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        let model = Self::replying("");
        *model.reply.lock().unwrap() = Err(message.to_string());
        model
    }

    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = Ok(reply.to_string());
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.options.lock().unwrap().push(options.clone());
        self.reply.lock().unwrap().clone().map_err(RagError::Generation)
    }
}

pub fn default_fields() -> Vec<String> {
    GenerationConfig::default().fields
}

pub fn generator(model: Arc<ScriptedModel>) -> AnswerGenerator {
    AnswerGenerator::new(
        model,
        GenerationOptions::from_config(&GenerationConfig::default()),
        ResponseSchema::new(default_fields()),
    )
}

pub fn settings(chunk_size: i64, overlap: i64) -> BotSettings {
    BotSettings {
        chunking: ChunkParams::new(chunk_size, overlap).unwrap(),
        top_k: 3,
        include_globs: vec!["*.docx".to_string()],
        structured: false,
    }
}

pub fn open_flat(dir: &Path) -> Arc<FlatIndex> {
    Arc::new(
        FlatIndex::open(
            &dir.join("data/index.bin"),
            &dir.join("data/texts.json"),
            Arc::new(HashEmbedder),
        )
        .unwrap(),
    )
}

/// A bot over a flat index stored under `dir`.
pub async fn flat_bot(
    dir: &Path,
    model: Arc<ScriptedModel>,
    chunk_size: i64,
    overlap: i64,
) -> (ChatBot, Arc<FlatIndex>) {
    let index = open_flat(dir);
    let as_dyn: Arc<dyn EmbeddingIndex> = index.clone();
    let bot = ChatBot::new(
        as_dyn,
        generator(model),
        PromptBuilder::default(),
        settings(chunk_size, overlap),
    )
    .await
    .unwrap();
    (bot, index)
}

/// Minimal `.docx` archive with one paragraph per entry.
pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

pub const STRUCTURED_REPLY: &str = r#"{"initial":"Olá!","promotion":"Plano básico por 10 reais","information":"Abre às nove","invite":"Venha conhecer"}"#;

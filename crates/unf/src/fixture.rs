//! Builders for synthetic backups, used by tests here and in dependent crates.
//!
//! These helpers panic on failure; they only ever write to memory.

use std::io::{Cursor, Write};

use aes::Aes128;
use bson::{doc, Document};
use cbc::cipher::{generic_array::GenericArray, BlockEncryptMut, KeyIvInit};
use flate2::{write::GzEncoder, Compression};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::archive::DEFAULT_ENTRY_NAME;
use crate::cipher::{CipherKey, BLOCK_SIZE};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// PKCS#7-pad and encrypt, mirroring how the controller writes backups.
pub fn encrypt(plaintext: &[u8], key: &CipherKey) -> Vec<u8> {
    let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
    let mut buf = plaintext.to_vec();
    buf.extend(std::iter::repeat(pad as u8).take(pad));

    let mut encryptor = Aes128CbcEnc::new(key.key().into(), key.iv().into());
    for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
    buf
}

/// Store the given entries, in order, in an uncompressed ZIP.
pub fn zip_entries(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);

    for (name, payload) in entries {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(payload).expect("write zip entry");
    }

    writer.finish().expect("finish zip").into_inner()
}

pub fn gzip(raw: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Serialize documents back to back.
pub fn bson_stream(documents: &[Document]) -> Vec<u8> {
    let mut out = Vec::new();
    for doc in documents {
        doc.to_writer(&mut out).expect("serialize document");
    }
    out
}

/// Assembles a complete encrypted backup around a document list.
#[derive(Clone, Debug)]
pub struct BackupFixture {
    documents: Vec<Document>,
    extra_entries: Vec<(String, Vec<u8>)>,
    entry_name: String,
    key: CipherKey,
}

impl Default for BackupFixture {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            extra_entries: Vec::new(),
            entry_name: DEFAULT_ENTRY_NAME.to_string(),
            key: CipherKey::appliance_default(),
        }
    }
}

impl BackupFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two documents: the `setting` select marker and a settings record
    /// carrying `hostname`.
    pub fn with_hostname(hostname: &str) -> Self {
        Self::new().collection("setting", vec![doc! { "key": "mgmt", "hostname": hostname }])
    }

    pub fn document(mut self, doc: Document) -> Self {
        self.documents.push(doc);
        self
    }

    /// Append a select marker for `name` followed by its documents.
    pub fn collection(mut self, name: &str, documents: Vec<Document>) -> Self {
        self.documents.push(doc! { "__cmd": "select", "collection": name });
        self.documents.extend(documents);
        self
    }

    /// Append an `alert` collection with one record per `(key, time)`.
    pub fn alerts(self, alerts: &[(&str, &str)]) -> Self {
        let records = alerts
            .iter()
            .map(|(key, time)| doc! { "key": *key, "time": *time })
            .collect();
        self.collection("alert", records)
    }

    /// Extra archive entry written before the database entry.
    pub fn entry(mut self, name: &str, payload: &[u8]) -> Self {
        self.extra_entries.push((name.to_string(), payload.to_vec()));
        self
    }

    pub fn entry_name(mut self, name: &str) -> Self {
        self.entry_name = name.to_string();
        self
    }

    pub fn key(mut self, key: CipherKey) -> Self {
        self.key = key;
        self
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Unencrypted ZIP bytes.
    pub fn archive(&self) -> Vec<u8> {
        let database = gzip(&bson_stream(&self.documents));

        let mut entries: Vec<(&str, &[u8])> = self
            .extra_entries
            .iter()
            .map(|(name, payload)| (name.as_str(), payload.as_slice()))
            .collect();
        entries.push((self.entry_name.as_str(), database.as_slice()));
        zip_entries(&entries)
    }

    /// Encrypted `.unf` bytes.
    pub fn build(&self) -> Vec<u8> {
        encrypt(&self.archive(), &self.key)
    }
}


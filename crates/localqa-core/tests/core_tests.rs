use std::fs;
use tempfile::TempDir;

use localqa_core::{Chunker, ChunkingConfig, DocumentFormat, DocumentLoader};

fn sample_dir() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("a.txt"), "The sky is blue.").unwrap();
    fs::write(dir.join("b.txt"), "Grass is green.").unwrap();
    fs::write(dir.join("c.md"), "# Notes\nWater is wet.").unwrap();
    fs::write(dir.join("ignored.csv"), "x,y").unwrap();
    tmp
}

#[test]
fn directory_loads_three_documents_into_four_chunks() {
    let tmp = sample_dir();
    let loader = DocumentLoader::new();
    let chunker = Chunker::new(ChunkingConfig { chunk_size: 20, overlap: 5 }).unwrap();

    let files = loader.discover(tmp.path()).unwrap();
    assert_eq!(files.len(), 3, "csv is not a supported format");

    let docs: Vec<_> = files
        .iter()
        .map(|f| loader.load_relative(tmp.path(), f).unwrap())
        .collect();
    let origins: Vec<_> = docs.iter().map(|d| d.origin.as_str()).collect();
    assert_eq!(origins, vec!["a.txt", "b.txt", "c.md"]);
    assert_eq!(docs[2].format, DocumentFormat::Markdown);

    let per_doc: Vec<usize> = docs.iter().map(|d| chunker.split(d).len()).collect();
    assert_eq!(per_doc, vec![1, 1, 2]);
}

#[test]
fn reloading_a_file_yields_identical_chunks() {
    let tmp = sample_dir();
    let loader = DocumentLoader::new();
    let chunker = Chunker::new(ChunkingConfig { chunk_size: 20, overlap: 5 }).unwrap();
    let path = tmp.path().join("c.md");

    let first = chunker.split(&loader.load_relative(tmp.path(), &path).unwrap());
    let second = chunker.split(&loader.load_relative(tmp.path(), &path).unwrap());
    assert_eq!(first, second);
}

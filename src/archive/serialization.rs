//! JSON Lines 输出与 gzip 压缩

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// 按行写入 JSON 的输出端，可选 gzip 压缩
pub enum JsonLinesWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl JsonLinesWriter {
    /// 创建输出文件（父目录需已存在）
    pub fn create(path: &Path, gzip: bool) -> std::io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(if gzip {
            Self::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Self::Plain(file)
        })
    }

    fn inner(&mut self) -> &mut dyn Write {
        match self {
            Self::Plain(w) => w,
            Self::Gzip(w) => w,
        }
    }

    /// 写入一个分段标记行（如 `MESSAGES`）
    pub fn write_marker(&mut self, marker: &str) -> std::io::Result<()> {
        let w = self.inner();
        w.write_all(marker.as_bytes())?;
        w.write_all(b"\n")
    }

    /// 写入一行紧凑 JSON
    pub fn write_value(&mut self, value: &Value) -> std::io::Result<()> {
        let w = self.inner();
        serde_json::to_writer(&mut *w, value)?;
        w.write_all(b"\n")
    }

    /// 结束写入（gzip 需要写出尾部）
    pub fn finish(self) -> std::io::Result<()> {
        match self {
            Self::Plain(mut w) => w.flush(),
            Self::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// 解压 gzip 数据
#[cfg(test)]
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

//! 画像ファイルのデコード

use std::path::Path;

use image::RgbImage;

use crate::error::{Result, TriageError};

/// デコード済みの画像 (H, W, 3) u8
///
/// 所有権を手放した時点でバッファは解放されます。
#[derive(Debug, Clone)]
pub struct PixelTensor {
    image: RgbImage,
}

impl PixelTensor {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// (H, W, 3)
    pub fn shape(&self) -> [usize; 3] {
        [self.image.height() as usize, self.image.width() as usize, 3]
    }

    /// HWC順の生データ
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }
}

/// ファイルパスから画像を読み込む
///
/// 形式は拡張子ではなく内容から判定します。
/// アルファチャネルやグレースケールはRGBに変換されます。
pub fn load_pixels(path: &Path) -> Result<PixelTensor> {
    let decode_err = |e: &dyn std::fmt::Display| TriageError::Decode(format!("{}: {}", path.display(), e));

    let img = image::ImageReader::open(path)
        .map_err(|e| decode_err(&e))?
        .with_guessed_format()
        .map_err(|e| decode_err(&e))?
        .decode()
        .map_err(|e| decode_err(&e))?;
    Ok(PixelTensor::from_rgb(img.to_rgb8()))
}

/// メモリ上のバイト列から画像を読み込む
pub fn load_pixels_from_bytes(bytes: &[u8]) -> Result<PixelTensor> {
    let img = image::load_from_memory(bytes)?;
    Ok(PixelTensor::from_rgb(img.to_rgb8()))
}

/// 先頭バイトから推定したMIMEタイプ
///
/// 画像として認識できない場合は `None`
pub fn sniff_mime_type(header: &[u8]) -> Option<&'static str> {
    image::guess_format(header).ok().map(|format| format.to_mime_type())
}

/// ファイル先頭を読んでMIMEタイプを推定
pub fn sniff_mime_type_of(path: &Path) -> Result<Option<&'static str>> {
    use std::io::Read;

    let mut header = [0u8; 64];
    let mut file = std::fs::File::open(path)?;
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(sniff_mime_type(&header[..filled]))
}

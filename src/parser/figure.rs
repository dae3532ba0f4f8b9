use std::io::{Cursor, Read as IoRead};

use anyhow::Result;
use image::{DynamicImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

/// 小于该边长的图多半是图标/徽标
const MIN_SIDE: u32 = 200;
/// 超过该纵横比的图多半是分隔线
const MAX_ASPECT: f32 = 6.0;

pub struct FigureExtractor;

impl FigureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 扫描 PDF 内嵌图片，挑出面积最大的候选主图，编码为 PNG。
    /// 没有合格候选时返回 Ok(None)；文档级失败由调用方决定降级。
    pub fn extract_main_figure(&self, pdf_bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let doc = Document::load_mem(pdf_bytes)?;
        let image_ids = collect_image_ids(&doc);
        debug!("PDF中发现 {} 个Image对象", image_ids.len());

        let candidates = image_ids
            .into_iter()
            .filter_map(|(obj_id, _page)| decode_image(&doc, obj_id));

        match select_best(candidates) {
            Some(img) => {
                let mut png = Vec::new();
                img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
                Ok(Some(png))
            }
            None => Ok(None),
        }
    }
}

/// 过滤规则：最短边不足 MIN_SIDE 或纵横比超过 MAX_ASPECT 的一律拒绝。
fn is_candidate(width: u32, height: u32) -> bool {
    if width.min(height) < MIN_SIDE {
        return false;
    }
    let w = width as f32;
    let h = height as f32;
    w / h <= MAX_ASPECT && h / w <= MAX_ASPECT
}

/// 在合格候选里保留面积最大者，面积相同先到先得。
fn select_best<I: IntoIterator<Item = DynamicImage>>(images: I) -> Option<DynamicImage> {
    let mut best: Option<(DynamicImage, u64)> = None;
    for img in images {
        let (w, h) = (img.width(), img.height());
        if !is_candidate(w, h) {
            continue;
        }
        let area = u64::from(w) * u64::from(h);
        if best.as_ref().map_or(true, |(_, best_area)| area > *best_area) {
            best = Some((img, area));
        }
    }
    best.map(|(img, _)| img)
}

/// 遍历文档所有对象，找出 Subtype=Image 的 Stream 对象。
/// 不依赖页面树结构，嵌套在 Form XObject 中的图片也能找到。
fn collect_image_ids(doc: &Document) -> Vec<(ObjectId, usize)> {
    let mut image_ids: Vec<(ObjectId, usize)> = Vec::new();

    for (&obj_id, object) in doc.objects.iter() {
        let stream = match object.as_stream() {
            Ok(s) => s,
            Err(_) => continue,
        };

        let subtype = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|s| s.as_name().ok())
            .and_then(|n| std::str::from_utf8(n).ok());

        if subtype == Some("Image") {
            let page_num = find_page_for_object(doc, obj_id).unwrap_or(0);
            image_ids.push((obj_id, page_num));
        }
    }

    // 按页码排序，页内保持对象顺序
    image_ids.sort_by_key(|(_, page)| *page);
    image_ids
}

/// Best effort：通过页面 XObject 引用判断对象属于哪一页。
fn find_page_for_object(doc: &Document, target_id: ObjectId) -> Option<usize> {
    for (page_num, page_id) in doc.get_pages() {
        if page_references_object(doc, page_id, target_id, 0) {
            return Some(page_num as usize);
        }
    }
    None
}

/// 检查页面（含其 Form XObject，限制递归深度）是否引用目标对象。
fn page_references_object(doc: &Document, start_id: ObjectId, target_id: ObjectId, depth: u32) -> bool {
    if depth > 3 {
        return false;
    }

    let obj = match doc.get_object(start_id) {
        Ok(o) => o,
        Err(_) => return false,
    };
    let dict = match obj.as_dict().or_else(|_| obj.as_stream().map(|s| &s.dict)) {
        Ok(d) => d,
        Err(_) => return false,
    };

    let xobj_dict = match xobjects_from_dict(doc, dict) {
        Some(d) => d,
        None => return false,
    };

    for (_, val) in xobj_dict.iter() {
        if let Ok(ref_id) = val.as_reference() {
            if ref_id == target_id {
                return true;
            }
            if let Ok(ref_obj) = doc.get_object(ref_id) {
                if let Ok(ref_stream) = ref_obj.as_stream() {
                    let sub = ref_stream
                        .dict
                        .get(b"Subtype")
                        .ok()
                        .and_then(|s| s.as_name().ok())
                        .and_then(|n| std::str::from_utf8(n).ok());
                    if sub == Some("Form")
                        && page_references_object(doc, ref_id, target_id, depth + 1)
                    {
                        return true;
                    }
                }
            }
        }
    }

    false
}

fn xobjects_from_dict<'a>(doc: &'a Document, dict: &'a Dictionary) -> Option<&'a Dictionary> {
    let res_ref = dict.get(b"Resources").ok()?;
    let (_, res_obj) = doc.dereference(res_ref).ok()?;
    let res_dict = res_obj.as_dict().ok()?;
    let xobj_ref = res_dict.get(b"XObject").ok()?;
    let (_, xobj_obj) = doc.dereference(xobj_ref).ok()?;
    xobj_obj.as_dict().ok()
}

/// 把一个 Image 流对象解码成像素图。字典尺寸先过一遍候选过滤，
/// 避免解码注定淘汰的图；任何解码失败只影响这一张图。
fn decode_image(doc: &Document, obj_id: ObjectId) -> Option<DynamicImage> {
    let obj = doc.get_object(obj_id).ok()?;
    let stream = obj.as_stream().ok()?;

    let width = stream
        .dict
        .get(b"Width")
        .ok()
        .and_then(|w| w.as_i64().ok())
        .unwrap_or(0) as u32;
    let height = stream
        .dict
        .get(b"Height")
        .ok()
        .and_then(|h| h.as_i64().ok())
        .unwrap_or(0) as u32;

    if !is_candidate(width, height) {
        debug!("跳过非候选图片: {}x{} (obj {:?})", width, height, obj_id);
        return None;
    }

    let img = match filter_name(&stream.dict).as_deref() {
        Some("DCTDecode") => {
            // JPEG 数据
            let data = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            image::load_from_memory(&data).ok()?
        }
        Some("FlateDecode") => {
            // lopdf 的解压偶尔失败，退回手动 flate2
            let data = match stream.decompressed_content() {
                Ok(d) => d,
                Err(_) => manual_inflate(&stream.content).ok()?,
            };
            decode_raw(&stream.dict, doc, &data, width, height)?
        }
        Some(other) => {
            debug!("跳过不支持的编码: {} (obj {:?})", other, obj_id);
            return None;
        }
        None => decode_raw(&stream.dict, doc, &stream.content, width, height)?,
    };

    Some(flatten_alpha(img))
}

/// 带透明通道的图先压平成 RGB。
fn flatten_alpha(img: DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img
    }
}

/// 按位深与色彩空间重建裸像素缓冲。只处理 8 位分量。
fn decode_raw(
    dict: &Dictionary,
    doc: &Document,
    data: &[u8],
    width: u32,
    height: u32,
) -> Option<DynamicImage> {
    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|b| b.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        debug!("不支持的位深: {}", bits);
        return None;
    }

    if let Some(rgb) = decode_indexed(dict, doc, data, width, height) {
        return Some(DynamicImage::ImageRgb8(rgb));
    }

    let channels = color_channels(dict, doc);
    let expected = width as usize * height as usize * channels as usize;
    if data.len() < expected {
        debug!(
            "图片数据不足: {} < {} ({}x{}, ch={})",
            data.len(),
            expected,
            width,
            height,
            channels
        );
        return None;
    }

    match channels {
        1 => image::GrayImage::from_raw(width, height, data[..expected].to_vec())
            .map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, data[..expected].to_vec())
            .map(DynamicImage::ImageRgb8),
        // PDF 里 4 通道裸数据按 CMYK 处理，数值转换到 RGB
        4 => cmyk_to_rgb(&data[..expected], width, height).map(DynamicImage::ImageRgb8),
        _ => {
            debug!("不支持的通道数: {}", channels);
            None
        }
    }
}

fn cmyk_to_rgb(data: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for px in data.chunks_exact(4) {
        let (c, m, y, k) = (px[0] as u16, px[1] as u16, px[2] as u16, px[3] as u16);
        rgb.push(((255 - c) * (255 - k) / 255) as u8);
        rgb.push(((255 - m) * (255 - k) / 255) as u8);
        rgb.push(((255 - y) * (255 - k) / 255) as u8);
    }
    RgbImage::from_raw(width, height, rgb)
}

/// 解码 Indexed (调色板) 色彩空间: [/Indexed base hival lookup]，
/// 每像素 1 字节索引，经查找表映射到 RGB。只支持 RGB 基色。
fn decode_indexed(
    dict: &Dictionary,
    doc: &Document,
    data: &[u8],
    width: u32,
    height: u32,
) -> Option<RgbImage> {
    let cs_obj = dict.get(b"ColorSpace").ok()?;
    let arr = cs_obj.as_array().ok()?;

    let first_name = arr.first()?.as_name().ok()?;
    if std::str::from_utf8(first_name).ok()? != "Indexed" {
        return None;
    }

    let base_channels = arr
        .get(1)
        .and_then(|base| base.as_name().ok())
        .map(|n| channels_from_name(std::str::from_utf8(n).unwrap_or("DeviceRGB")))
        .unwrap_or(3);
    if base_channels != 3 {
        debug!("Indexed 基色空间非 RGB，跳过");
        return None;
    }

    let hival = arr.get(2)?.as_i64().ok()? as usize;
    let lookup = indexed_lookup_bytes(doc, arr.get(3)?)?;
    if lookup.len() < (hival + 1) * 3 {
        debug!("Indexed lookup表太小: {} < {}", lookup.len(), (hival + 1) * 3);
        return None;
    }

    let pixel_count = width as usize * height as usize;
    if data.len() < pixel_count {
        return None;
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for &idx in &data[..pixel_count] {
        let offset = (idx as usize).min(hival) * 3;
        rgb.extend_from_slice(&lookup[offset..offset + 3]);
    }
    RgbImage::from_raw(width, height, rgb)
}

fn indexed_lookup_bytes(doc: &Document, lookup_obj: &Object) -> Option<Vec<u8>> {
    match lookup_obj {
        Object::String(bytes, _) => Some(bytes.clone()),
        Object::Stream(stream) => Some(
            stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone()),
        ),
        Object::Reference(ref_id) => match doc.get_object(*ref_id).ok()? {
            Object::String(bytes, _) => Some(bytes.clone()),
            Object::Stream(stream) => Some(
                stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone()),
            ),
            _ => None,
        },
        _ => None,
    }
}

/// 手动 flate2 解压，先按 zlib 再退回裸 deflate。
fn manual_inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(compressed);
    let mut result = Vec::new();
    if decoder.read_to_end(&mut result).is_ok() {
        return Ok(result);
    }

    let mut decoder = flate2::read::DeflateDecoder::new(compressed);
    result.clear();
    decoder.read_to_end(&mut result)?;
    Ok(result)
}

/// 获取 Filter 名称，处理 Name 和 Array 两种形式。
fn filter_name(dict: &Dictionary) -> Option<String> {
    let filter_obj = dict.get(b"Filter").ok()?;

    if let Ok(name_bytes) = filter_obj.as_name() {
        return std::str::from_utf8(name_bytes).ok().map(|s| s.to_string());
    }

    if let Ok(arr) = filter_obj.as_array() {
        for item in arr.iter().rev() {
            if let Ok(name_bytes) = item.as_name() {
                if let Ok(name) = std::str::from_utf8(name_bytes) {
                    if matches!(name, "DCTDecode" | "JPXDecode" | "CCITTFaxDecode") {
                        return Some(name.to_string());
                    }
                }
            }
        }
        if let Some(first) = arr.first() {
            if let Ok(name_bytes) = first.as_name() {
                return std::str::from_utf8(name_bytes).ok().map(|s| s.to_string());
            }
        }
    }

    None
}

/// 从 ColorSpace 求通道数，ICCBased 读其 N 参数。
fn color_channels(dict: &Dictionary, doc: &Document) -> u32 {
    let cs_obj = match dict.get(b"ColorSpace") {
        Ok(obj) => obj,
        Err(_) => return 3,
    };

    if let Ok(name_bytes) = cs_obj.as_name() {
        return channels_from_name(std::str::from_utf8(name_bytes).unwrap_or(""));
    }

    if let Ok(arr) = cs_obj.as_array() {
        if let Some(first) = arr.first() {
            if let Ok(name_bytes) = first.as_name() {
                let name = std::str::from_utf8(name_bytes).unwrap_or("");
                match name {
                    "ICCBased" => {
                        if let Some(n) = icc_component_count(doc, arr.get(1)) {
                            return n;
                        }
                        return 3;
                    }
                    "Indexed" | "CalRGB" | "Lab" => return 3,
                    "CalGray" => return 1,
                    _ => return channels_from_name(name),
                }
            }
        }
    }

    if let Ok(ref_id) = cs_obj.as_reference() {
        if let Ok(resolved) = doc.get_object(ref_id) {
            if let Ok(name_bytes) = resolved.as_name() {
                return channels_from_name(std::str::from_utf8(name_bytes).unwrap_or(""));
            }
        }
    }

    3
}

fn icc_component_count(doc: &Document, icc_ref: Option<&Object>) -> Option<u32> {
    let ref_id = icc_ref?.as_reference().ok()?;
    let icc_obj = doc.get_object(ref_id).ok()?;
    let icc_stream = icc_obj.as_stream().ok()?;
    let n = icc_stream.dict.get(b"N").ok()?.as_i64().ok()?;
    Some(n as u32)
}

fn channels_from_name(name: &str) -> u32 {
    match name {
        "DeviceGray" | "CalGray" | "G" => 1,
        "DeviceRGB" | "CalRGB" | "RGB" => 3,
        "DeviceCMYK" | "CMYK" => 4,
        _ => 3,
    }
}

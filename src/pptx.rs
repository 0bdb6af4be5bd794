//! PowerPoint (.pptx) 读写
//!
//! 写出的包只包含一页一图所需的最少部件：一个母版、一个空白版式、一个主题。
//! 读取端只理解本模块写出的结构，用于核对页序和图片。

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::deck::{CanvasSpec, DeckEncoder, Placement};
use crate::error::{Error, Result};

/// 默认 JPEG 质量
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_P: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const NS_PKG_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// 第一页的 sldId，低于 256 的值是保留的
const FIRST_SLIDE_ID: usize = 256;

/// 把 RGB 画面编码为 JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(buf)
}

/// 流式写出 .pptx：每加入一页就把图片写进压缩包，最后补齐目录部件
pub struct PptxWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    slide_size: (u64, u64),
    jpeg_quality: u8,
    title: String,
    created: DateTime<Utc>,
    slide_count: usize,
}

impl PptxWriter {
    pub fn new(canvas: &CanvasSpec, jpeg_quality: u8) -> Result<Self> {
        if !(1..=100).contains(&jpeg_quality) {
            return Err(Error::config(format!(
                "jpeg_quality 必须在 1-100 之间: {jpeg_quality}"
            )));
        }
        Ok(Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            slide_size: (canvas.width_emu(), canvas.height_emu()),
            jpeg_quality,
            title: "Lecture Slides".to_string(),
            created: Utc::now(),
            slide_count: 0,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    fn put(&mut self, name: &str, data: &[u8], method: CompressionMethod) -> Result<()> {
        let options = FileOptions::default().compression_method(method);
        self.zip.start_file(name, options)?;
        self.zip.write_all(data)?;
        Ok(())
    }

    fn put_xml(&mut self, name: &str, xml: &str) -> Result<()> {
        self.put(name, xml.as_bytes(), CompressionMethod::Deflated)
    }

    fn content_types(&self) -> String {
        let mut xml = format!(
            r#"{XML_DECL}<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="jpeg" ContentType="image/jpeg"/><Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/><Override PartName="/ppt/slideMasters/slideMaster1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml"/><Override PartName="/ppt/slideLayouts/slideLayout1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml"/><Override PartName="/ppt/theme/theme1.xml" ContentType="application/vnd.openxmlformats-officedocument.theme+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/><Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>"#
        );
        for n in 1..=self.slide_count {
            xml.push_str(&format!(
                r#"<Override PartName="/ppt/slides/slide{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/>"#
            ));
        }
        xml.push_str("</Types>");
        xml
    }

    fn package_rels() -> String {
        format!(
            r#"{XML_DECL}<Relationships xmlns="{NS_PKG_RELS}"><Relationship Id="rId1" Type="{REL_BASE}/officeDocument" Target="ppt/presentation.xml"/><Relationship Id="rId2" Type="{NS_PKG_RELS}/metadata/core-properties" Target="docProps/core.xml"/><Relationship Id="rId3" Type="{REL_BASE}/extended-properties" Target="docProps/app.xml"/></Relationships>"#
        )
    }

    fn core_props(&self) -> String {
        let created = self.created.to_rfc3339_opts(SecondsFormat::Secs, true);
        format!(
            r#"{XML_DECL}<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><dc:title>{title}</dc:title><dc:creator>lecture-deck</dc:creator><dcterms:created xsi:type="dcterms:W3CDTF">{created}</dcterms:created><dcterms:modified xsi:type="dcterms:W3CDTF">{created}</dcterms:modified></cp:coreProperties>"#,
            title = escape_xml(&self.title)
        )
    }

    fn app_props(&self) -> String {
        format!(
            r#"{XML_DECL}<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties"><Application>lecture-deck</Application><Slides>{}</Slides></Properties>"#,
            self.slide_count
        )
    }

    fn presentation(&self) -> String {
        let slide_ids: String = (0..self.slide_count)
            .map(|i| {
                format!(
                    r#"<p:sldId id="{}" r:id="rId{}"/>"#,
                    FIRST_SLIDE_ID + i,
                    i + 3
                )
            })
            .collect();
        format!(
            r#"{XML_DECL}<p:presentation xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst><p:sldIdLst>{slide_ids}</p:sldIdLst><p:sldSz cx="{cx}" cy="{cy}"/><p:notesSz cx="6858000" cy="9144000"/></p:presentation>"#,
            cx = self.slide_size.0,
            cy = self.slide_size.1
        )
    }

    fn presentation_rels(&self) -> String {
        let mut xml = format!(
            r#"{XML_DECL}<Relationships xmlns="{NS_PKG_RELS}"><Relationship Id="rId1" Type="{REL_BASE}/slideMaster" Target="slideMasters/slideMaster1.xml"/><Relationship Id="rId2" Type="{REL_BASE}/theme" Target="theme/theme1.xml"/>"#
        );
        for n in 1..=self.slide_count {
            xml.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="{REL_BASE}/slide" Target="slides/slide{n}.xml"/>"#,
                n + 2
            ));
        }
        xml.push_str("</Relationships>");
        xml
    }
}

impl DeckEncoder for PptxWriter {
    fn append_image_slide(&mut self, image: &RgbImage, placement: &Placement) -> Result<()> {
        let n = self.slide_count + 1;
        let jpeg = encode_jpeg(image, self.jpeg_quality)?;

        // JPEG 本身已压缩，原样存入
        self.put(&format!("ppt/media/image{n}.jpeg"), &jpeg, CompressionMethod::Stored)?;
        self.put_xml(&format!("ppt/slides/slide{n}.xml"), &slide_xml(n, placement))?;
        self.put_xml(
            &format!("ppt/slides/_rels/slide{n}.xml.rels"),
            &format!(
                r#"{XML_DECL}<Relationships xmlns="{NS_PKG_RELS}"><Relationship Id="rId1" Type="{REL_BASE}/slideLayout" Target="../slideLayouts/slideLayout1.xml"/><Relationship Id="rId2" Type="{REL_BASE}/image" Target="../media/image{n}.jpeg"/></Relationships>"#
            ),
        )?;

        self.slide_count = n;
        debug!("📄 [PPTX] 第 {} 页已写入（JPEG {} 字节）", n, jpeg.len());
        Ok(())
    }

    fn save(mut self) -> Result<Vec<u8>> {
        let parts = [
            ("[Content_Types].xml", self.content_types()),
            ("_rels/.rels", Self::package_rels()),
            ("docProps/core.xml", self.core_props()),
            ("docProps/app.xml", self.app_props()),
            ("ppt/presentation.xml", self.presentation()),
            ("ppt/_rels/presentation.xml.rels", self.presentation_rels()),
            ("ppt/slideMasters/slideMaster1.xml", slide_master_xml()),
            (
                "ppt/slideMasters/_rels/slideMaster1.xml.rels",
                format!(
                    r#"{XML_DECL}<Relationships xmlns="{NS_PKG_RELS}"><Relationship Id="rId1" Type="{REL_BASE}/slideLayout" Target="../slideLayouts/slideLayout1.xml"/><Relationship Id="rId2" Type="{REL_BASE}/theme" Target="../theme/theme1.xml"/></Relationships>"#
                ),
            ),
            ("ppt/slideLayouts/slideLayout1.xml", slide_layout_xml()),
            (
                "ppt/slideLayouts/_rels/slideLayout1.xml.rels",
                format!(
                    r#"{XML_DECL}<Relationships xmlns="{NS_PKG_RELS}"><Relationship Id="rId1" Type="{REL_BASE}/slideMaster" Target="../slideMasters/slideMaster1.xml"/></Relationships>"#
                ),
            ),
            ("ppt/theme/theme1.xml", theme_xml()),
        ];
        for (name, xml) in &parts {
            self.put_xml(name, xml)?;
        }

        let cursor = self.zip.finish()?;
        let bytes = cursor.into_inner();
        debug!("📦 [PPTX] {} 页，共 {} 字节", self.slide_count, bytes.len());
        Ok(bytes)
    }
}

fn empty_group() -> &'static str {
    r#"<p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr>"#
}

fn slide_xml(n: usize, placement: &Placement) -> String {
    format!(
        r#"{XML_DECL}<p:sld xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:spTree>{group}<p:pic><p:nvPicPr><p:cNvPr id="2" name="Slide Image {n}"/><p:cNvPicPr><a:picLocks noChangeAspect="1"/></p:cNvPicPr><p:nvPr/></p:nvPicPr><p:blipFill><a:blip r:embed="rId2"/><a:stretch><a:fillRect/></a:stretch></p:blipFill><p:spPr><a:xfrm><a:off x="{x}" y="{y}"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr></p:pic></p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>"#,
        group = empty_group(),
        x = placement.x,
        y = placement.y,
        cx = placement.cx,
        cy = placement.cy
    )
}

fn slide_master_xml() -> String {
    format!(
        r#"{XML_DECL}<p:sldMaster xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:bg><p:bgRef idx="1001"><a:schemeClr val="bg1"/></p:bgRef></p:bg><p:spTree>{group}</p:spTree></p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/><p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/></p:sldLayoutIdLst></p:sldMaster>"#,
        group = empty_group()
    )
}

fn slide_layout_xml() -> String {
    format!(
        r#"{XML_DECL}<p:sldLayout xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" type="blank" preserve="1"><p:cSld name="Blank"><p:spTree>{group}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"#,
        group = empty_group()
    )
}

fn theme_xml() -> String {
    let colors = [
        ("dk1", "000000"),
        ("lt1", "FFFFFF"),
        ("dk2", "44546A"),
        ("lt2", "E7E6E6"),
        ("accent1", "4472C4"),
        ("accent2", "ED7D31"),
        ("accent3", "A5A5A5"),
        ("accent4", "FFC000"),
        ("accent5", "5B9BD5"),
        ("accent6", "70AD47"),
        ("hlink", "0563C1"),
        ("folHlink", "954F72"),
    ];
    let scheme: String = colors
        .iter()
        .map(|(name, rgb)| format!(r#"<a:{name}><a:srgbClr val="{rgb}"/></a:{name}>"#))
        .collect();
    let fonts = r#"<a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/>"#;
    let fill = r#"<a:solidFill><a:schemeClr val="phClr"/></a:solidFill>"#;
    let line = r#"<a:ln w="9525"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln>"#;
    let effect = r#"<a:effectStyle><a:effectLst/></a:effectStyle>"#;
    format!(
        r#"{XML_DECL}<a:theme xmlns:a="{NS_A}" name="Office Theme"><a:themeElements><a:clrScheme name="Office">{scheme}</a:clrScheme><a:fontScheme name="Office"><a:majorFont>{fonts}</a:majorFont><a:minorFont>{fonts}</a:minorFont></a:fontScheme><a:fmtScheme name="Office"><a:fillStyleLst>{fill}{fill}{fill}</a:fillStyleLst><a:lnStyleLst>{line}{line}{line}</a:lnStyleLst><a:effectStyleLst>{effect}{effect}{effect}</a:effectStyleLst><a:bgFillStyleLst>{fill}{fill}{fill}</a:bgFillStyleLst></a:fmtScheme></a:themeElements><a:objectDefaults/><a:extraClrSchemeLst/></a:theme>"#
    )
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// 读回的一页
#[derive(Debug, Clone)]
pub struct ReadSlide {
    /// 包内图片路径，如 `ppt/media/image1.jpeg`
    pub media_path: String,
    pub image_bytes: Vec<u8>,
    pub placement: Placement,
}

impl ReadSlide {
    pub fn decode_image(&self) -> Result<RgbImage> {
        Ok(image::load_from_memory(&self.image_bytes)?.to_rgb8())
    }
}

#[derive(Debug, Clone)]
pub struct ReadDeck {
    pub slide_size: (u64, u64),
    pub slides: Vec<ReadSlide>,
}

/// 读取本模块写出的 .pptx
pub struct PptxReader {
    archive: ZipArchive<Cursor<Vec<u8>>>,
}

impl PptxReader {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        Ok(Self {
            archive: ZipArchive::new(Cursor::new(bytes))?,
        })
    }

    pub fn read(mut self) -> Result<ReadDeck> {
        let presentation = self.read_text("ppt/presentation.xml")?;
        let rels = self.read_rels("ppt/_rels/presentation.xml.rels")?;

        let slide_size = tags(&presentation, "p:sldSz")
            .next()
            .and_then(|tag| Some((parse_attr(tag, "cx")?, parse_attr(tag, "cy")?)))
            .ok_or_else(|| Error::MalformedDocument("presentation.xml 缺少 sldSz".into()))?;

        // 页序以 sldIdLst 为准，而不是文件名
        let slide_rids: Vec<String> = tags(&presentation, "p:sldId")
            .filter_map(|tag| attr(tag, "r:id").map(str::to_string))
            .collect();

        let mut slides = Vec::with_capacity(slide_rids.len());
        for rid in slide_rids {
            let target = rels.get(&rid).ok_or_else(|| {
                Error::MalformedDocument(format!("presentation.xml.rels 缺少 {rid}"))
            })?;
            slides.push(self.read_slide(&format!("ppt/{target}"))?);
        }

        Ok(ReadDeck { slide_size, slides })
    }

    fn read_slide(&mut self, slide_path: &str) -> Result<ReadSlide> {
        let xml = self.read_text(slide_path)?;
        let (dir, file) = slide_path
            .rsplit_once('/')
            .ok_or_else(|| Error::MalformedDocument(format!("非法的页面路径: {slide_path}")))?;
        let rels = self.read_rels(&format!("{dir}/_rels/{file}.rels"))?;

        let malformed = || Error::MalformedDocument(format!("{slide_path} 中没有图片"));
        let pic = xml.split_once("<p:pic>").map(|(_, rest)| rest).ok_or_else(malformed)?;
        let embed = tags(pic, "a:blip")
            .next()
            .and_then(|tag| attr(tag, "r:embed"))
            .ok_or_else(malformed)?;
        let off = tags(pic, "a:off").next().ok_or_else(malformed)?;
        let ext = tags(pic, "a:ext").next().ok_or_else(malformed)?;
        let placement = (|| {
            Some(Placement {
                x: parse_attr(off, "x")?,
                y: parse_attr(off, "y")?,
                cx: parse_attr(ext, "cx")?,
                cy: parse_attr(ext, "cy")?,
            })
        })()
        .ok_or_else(malformed)?;

        let target = rels.get(embed).ok_or_else(|| {
            Error::MalformedDocument(format!("{slide_path} 的关系中缺少 {embed}"))
        })?;
        let media_path = resolve(dir, target);

        let mut image_bytes = Vec::new();
        self.archive.by_name(&media_path)?.read_to_end(&mut image_bytes)?;

        Ok(ReadSlide {
            media_path,
            image_bytes,
            placement,
        })
    }

    fn read_text(&mut self, name: &str) -> Result<String> {
        let mut text = String::new();
        self.archive.by_name(name)?.read_to_string(&mut text)?;
        Ok(text)
    }

    /// Id -> Target
    fn read_rels(&mut self, name: &str) -> Result<HashMap<String, String>> {
        let xml = self.read_text(name)?;
        Ok(tags(&xml, "Relationship")
            .filter_map(|tag| Some((attr(tag, "Id")?.to_string(), attr(tag, "Target")?.to_string())))
            .collect())
    }
}

/// 依次返回名为 `name` 的开始标签的属性部分
fn tags<'a>(xml: &'a str, name: &str) -> impl Iterator<Item = &'a str> + 'a {
    let open = format!("<{name} ");
    let mut rest = xml;
    std::iter::from_fn(move || {
        let start = rest.find(&open)? + open.len();
        let end = rest[start..].find('>')? + start;
        let tag = &rest[start..end];
        rest = &rest[end..];
        Some(tag)
    })
}

fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let key = format!(" {name}=\"");
    let padded_start = if tag.starts_with(&key[1..]) {
        Some(key.len() - 1)
    } else {
        tag.find(&key).map(|i| i + key.len())
    }?;
    let end = tag[padded_start..].find('"')?;
    Some(&tag[padded_start..padded_start + end])
}

fn parse_attr(tag: &str, name: &str) -> Option<u64> {
    attr(tag, name)?.parse().ok()
}

/// 把相对目标解析成包内绝对路径
fn resolve(dir: &str, target: &str) -> String {
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            ".." => {
                parts.pop();
            }
            "." | "" => {}
            s => parts.push(s),
        }
    }
    parts.join("/")
}

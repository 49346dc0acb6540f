//! XML payload decoding.
//!
//! WeChat carries everything beyond plain text as XML inside `Content`. The
//! wire format is decoded exactly once, here, into tagged variants; malformed
//! or unknown payloads collapse to [`Content::Unrecognized`] instead of
//! erroring, because a single bad message must never stall a conversation
//! worker.

use serde::Deserialize;

// ── Decoded variants ────────────────────────────────────────────

/// Classified message content.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Plain text (`MsgType` 1).
    Text(String),
    /// Image descriptor (`MsgType` 3).
    Image(ImageInfo),
    /// Voice descriptor (`MsgType` 34).
    Voice(VoiceInfo),
    /// Video descriptor (`MsgType` 43).
    Video(VideoInfo),
    /// Animated sticker descriptor (`MsgType` 47).
    Sticker(StickerInfo),
    /// Shared location (`MsgType` 48).
    Location(LocationInfo),
    /// App message (`MsgType` 49), sub-classified by `appmsg.type`.
    App(AppContent),
    /// System message (`MsgType` 10002), sub-classified by `sysmsg@type`.
    Sys(SysContent),
    /// VoIP call summary (`MsgType` 50).
    Voip(String),
    /// Anything the bridge does not render.
    Unrecognized,
}

/// Image payload: lengths and CDN coordinates for the download path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageInfo {
    pub aes_key: String,
    pub cdn_big_url: String,
    pub cdn_mid_url: String,
    pub cdn_thumb_url: String,
    pub length: u64,
    pub md5: String,
}

impl ImageInfo {
    /// Best-available CDN URL by priority: big > mid > thumb.
    pub fn best_cdn_url(&self) -> Option<&str> {
        [&self.cdn_big_url, &self.cdn_mid_url, &self.cdn_thumb_url]
            .into_iter()
            .find(|u| !u.is_empty())
            .map(String::as_str)
    }
}

/// Voice payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceInfo {
    pub aes_key: String,
    pub length: u64,
    pub buf_id: String,
    /// Duration in milliseconds.
    pub voice_length_ms: u64,
}

/// Video payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    pub length: u64,
    pub md5: String,
    pub play_length_secs: u64,
}

/// Sticker payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StickerInfo {
    pub md5: String,
    pub len: u64,
    pub cdn_url: String,
}

/// Location payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationInfo {
    pub x: f64,
    pub y: f64,
    pub label: String,
    pub poi_name: String,
}

/// File attachment coordinates for the chunked download path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileAttach {
    pub title: String,
    pub total_len: u64,
    pub attach_id: String,
    pub app_id: String,
    pub file_ext: String,
    pub md5: String,
}

/// A published-article entry from an official-account push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub summary: String,
}

/// One item of a forwarded chat-history bundle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordItem {
    pub source_name: String,
    pub source_time: String,
    pub data_desc: String,
}

/// Forwarded chat-history bundle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordInfo {
    pub title: String,
    pub count: u32,
    pub items: Vec<RecordItem>,
}

/// App-message variants (`appmsg.type`).
#[derive(Debug, Clone, PartialEq)]
pub enum AppContent {
    /// type=5: external link, optionally with an article list.
    Link {
        title: String,
        url: String,
        des: String,
        articles: Vec<Article>,
    },
    /// type=6: file attachment.
    File(FileAttach),
    /// type=19: forwarded chat-history bundle.
    ChatHistory {
        title: String,
        record: Option<RecordInfo>,
    },
    /// type=33: mini-program.
    MiniProgram {
        title: String,
        source_display_name: String,
    },
    /// type=51: video-channel share.
    Channel { nickname: String, desc: String },
    /// type=53: group collaboration note.
    GroupNote { title: String },
    /// type=57: quoted reply.
    Quote { title: String, refer_svrid: i64 },
    /// type=2000: transfer.
    Transfer { fee_desc: String },
    /// Anything else, kept with its type for placeholder rendering.
    Other { app_type: i64, title: String },
}

impl AppContent {
    /// The `appmsg.type` value this variant was classified from.
    pub fn app_type(&self) -> i64 {
        match self {
            AppContent::Link { .. } => 5,
            AppContent::File(_) => 6,
            AppContent::ChatHistory { .. } => 19,
            AppContent::MiniProgram { .. } => 33,
            AppContent::Channel { .. } => 51,
            AppContent::GroupNote { .. } => 53,
            AppContent::Quote { .. } => 57,
            AppContent::Transfer { .. } => 2000,
            AppContent::Other { app_type, .. } => *app_type,
        }
    }
}

/// System-message variants (`sysmsg@type`).
#[derive(Debug, Clone, PartialEq)]
pub enum SysContent {
    /// Revocation of an earlier message.
    Revoke {
        new_msg_id: i64,
        replace_msg: String,
    },
    /// "Pat" nudge with a `${wxid}` template.
    Pat { template: String },
    /// Unhandled system type, kept for blacklist checks.
    Other(String),
}

// ── Wire structs (serde / quick-xml) ────────────────────────────

fn de<T: for<'de> Deserialize<'de>>(xml: &str) -> Option<T> {
    quick_xml::de::from_str(strip_decl(xml)).ok()
}

fn strip_decl(xml: &str) -> &str {
    let trimmed = xml.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<?xml") {
        if let Some((_, body)) = rest.split_once("?>") {
            return body;
        }
    }
    trimmed
}

fn num<T: std::str::FromStr + Default>(s: &str) -> T {
    s.trim().parse().unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
struct MsgXml {
    #[serde(default)]
    img: Option<ImgXml>,
    #[serde(default)]
    voicemsg: Option<VoiceXml>,
    #[serde(default)]
    videomsg: Option<VideoXml>,
    #[serde(default)]
    emoji: Option<EmojiXml>,
    #[serde(default)]
    location: Option<LocationXml>,
    #[serde(default)]
    appmsg: Option<AppMsgXml>,
}

#[derive(Debug, Default, Deserialize)]
struct ImgXml {
    #[serde(rename = "@aeskey", default)]
    aeskey: String,
    #[serde(rename = "@cdnbigimgurl", default)]
    cdnbigimgurl: String,
    #[serde(rename = "@cdnmidimgurl", default)]
    cdnmidimgurl: String,
    #[serde(rename = "@cdnthumburl", default)]
    cdnthumburl: String,
    #[serde(rename = "@length", default)]
    length: String,
    #[serde(rename = "@md5", default)]
    md5: String,
}

#[derive(Debug, Default, Deserialize)]
struct VoiceXml {
    #[serde(rename = "@aeskey", default)]
    aeskey: String,
    #[serde(rename = "@length", default)]
    length: String,
    #[serde(rename = "@bufid", default)]
    bufid: String,
    #[serde(rename = "@voicelength", default)]
    voicelength: String,
}

#[derive(Debug, Default, Deserialize)]
struct VideoXml {
    #[serde(rename = "@length", default)]
    length: String,
    #[serde(rename = "@md5", default)]
    md5: String,
    #[serde(rename = "@playlength", default)]
    playlength: String,
}

#[derive(Debug, Default, Deserialize)]
struct EmojiXml {
    #[serde(rename = "@md5", default)]
    md5: String,
    #[serde(rename = "@len", default)]
    len: String,
    #[serde(rename = "@cdnurl", default)]
    cdnurl: String,
}

#[derive(Debug, Default, Deserialize)]
struct LocationXml {
    #[serde(rename = "@x", default)]
    x: String,
    #[serde(rename = "@y", default)]
    y: String,
    #[serde(rename = "@label", default)]
    label: String,
    #[serde(rename = "@poiname", default)]
    poiname: String,
}

#[derive(Debug, Default, Deserialize)]
struct AppMsgXml {
    #[serde(rename = "@appid", default)]
    appid: String,
    #[serde(rename = "type", default)]
    app_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    des: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    sourcedisplayname: String,
    #[serde(default)]
    recorditem: String,
    #[serde(default)]
    appattach: Option<AppAttachXml>,
    #[serde(default)]
    refermsg: Option<ReferMsgXml>,
    #[serde(default)]
    wcpayinfo: Option<WcPayInfoXml>,
    #[serde(rename = "finderFeed", default)]
    finder_feed: Option<FinderFeedXml>,
    #[serde(default)]
    mmreader: Option<MmReaderXml>,
}

#[derive(Debug, Default, Deserialize)]
struct AppAttachXml {
    #[serde(default)]
    totallen: String,
    #[serde(default)]
    attachid: String,
    #[serde(default)]
    fileext: String,
    #[serde(default)]
    filemd5: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReferMsgXml {
    #[serde(default)]
    svrid: String,
}

#[derive(Debug, Default, Deserialize)]
struct WcPayInfoXml {
    #[serde(default)]
    feedesc: String,
}

#[derive(Debug, Default, Deserialize)]
struct FinderFeedXml {
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Default, Deserialize)]
struct MmReaderXml {
    #[serde(default)]
    category: Option<CategoryXml>,
}

#[derive(Debug, Default, Deserialize)]
struct CategoryXml {
    #[serde(default)]
    item: Vec<ItemXml>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemXml {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Default, Deserialize)]
struct SysMsgXml {
    #[serde(rename = "@type", default)]
    sys_type: String,
    #[serde(default)]
    revokemsg: Option<RevokeMsgXml>,
    #[serde(default)]
    pat: Option<PatXml>,
}

#[derive(Debug, Default, Deserialize)]
struct RevokeMsgXml {
    #[serde(default)]
    newmsgid: String,
    #[serde(default)]
    replacemsg: String,
}

#[derive(Debug, Default, Deserialize)]
struct PatXml {
    #[serde(default)]
    template: String,
}

#[derive(Debug, Default, Deserialize)]
struct VoipMsgXml {
    #[serde(rename = "@type", default)]
    voip_type: String,
    #[serde(rename = "VoIPBubbleMsg", default)]
    bubble: Option<VoipBubbleXml>,
}

#[derive(Debug, Default, Deserialize)]
struct VoipBubbleXml {
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Default, Deserialize)]
struct RecordInfoXml {
    #[serde(default)]
    title: String,
    #[serde(default)]
    datalist: Option<DataListXml>,
}

#[derive(Debug, Default, Deserialize)]
struct DataListXml {
    #[serde(rename = "@count", default)]
    count: String,
    #[serde(default)]
    dataitem: Vec<DataItemXml>,
}

#[derive(Debug, Default, Deserialize)]
struct DataItemXml {
    #[serde(default)]
    sourcename: String,
    #[serde(default)]
    sourcetime: String,
    #[serde(default)]
    datadesc: String,
}

// ── Classification ──────────────────────────────────────────────

impl Content {
    /// Decode raw content by wire type.
    pub fn decode(msg_type: i64, raw: &str) -> Self {
        match msg_type {
            1 => Content::Text(raw.to_owned()),
            3 => decode_image(raw),
            34 => decode_voice(raw),
            43 => decode_video(raw),
            47 => decode_sticker(raw),
            48 => decode_location(raw),
            49 => decode_app(raw),
            50 => decode_voip(raw),
            10002 => decode_sys(raw),
            _ => Content::Unrecognized,
        }
    }
}

fn decode_image(raw: &str) -> Content {
    let Some(msg) = de::<MsgXml>(raw) else {
        return Content::Unrecognized;
    };
    match msg.img {
        Some(img) => Content::Image(ImageInfo {
            aes_key: img.aeskey,
            cdn_big_url: img.cdnbigimgurl,
            cdn_mid_url: img.cdnmidimgurl,
            cdn_thumb_url: img.cdnthumburl,
            length: num(&img.length),
            md5: img.md5,
        }),
        None => Content::Unrecognized,
    }
}

fn decode_voice(raw: &str) -> Content {
    let Some(msg) = de::<MsgXml>(raw) else {
        return Content::Unrecognized;
    };
    match msg.voicemsg {
        Some(v) => Content::Voice(VoiceInfo {
            aes_key: v.aeskey,
            length: num(&v.length),
            buf_id: v.bufid,
            voice_length_ms: num(&v.voicelength),
        }),
        None => Content::Unrecognized,
    }
}

fn decode_video(raw: &str) -> Content {
    let Some(msg) = de::<MsgXml>(raw) else {
        return Content::Unrecognized;
    };
    match msg.videomsg {
        Some(v) => Content::Video(VideoInfo {
            length: num(&v.length),
            md5: v.md5,
            play_length_secs: num(&v.playlength),
        }),
        None => Content::Unrecognized,
    }
}

fn decode_sticker(raw: &str) -> Content {
    let Some(msg) = de::<MsgXml>(raw) else {
        return Content::Unrecognized;
    };
    match msg.emoji {
        Some(e) => Content::Sticker(StickerInfo {
            md5: e.md5,
            len: num(&e.len),
            cdn_url: e.cdnurl,
        }),
        None => Content::Unrecognized,
    }
}

fn decode_location(raw: &str) -> Content {
    let Some(msg) = de::<MsgXml>(raw) else {
        return Content::Unrecognized;
    };
    match msg.location {
        Some(l) => Content::Location(LocationInfo {
            x: num(&l.x),
            y: num(&l.y),
            label: l.label,
            poi_name: l.poiname,
        }),
        None => Content::Unrecognized,
    }
}

fn decode_app(raw: &str) -> Content {
    let Some(msg) = de::<MsgXml>(raw) else {
        return Content::Unrecognized;
    };
    let Some(app) = msg.appmsg else {
        return Content::Unrecognized;
    };

    let app_type: i64 = num(&app.app_type);
    let content = match app_type {
        5 => {
            let articles = app
                .mmreader
                .and_then(|r| r.category)
                .map(|c| {
                    c.item
                        .into_iter()
                        .map(|i| Article {
                            title: i.title,
                            url: i.url,
                            summary: if i.summary.is_empty() { i.digest } else { i.summary },
                        })
                        .collect()
                })
                .unwrap_or_default();
            AppContent::Link {
                title: app.title,
                url: app.url,
                des: app.des,
                articles,
            }
        }
        6 => {
            let attach = app.appattach.unwrap_or_default();
            AppContent::File(FileAttach {
                title: app.title,
                total_len: num(&attach.totallen),
                attach_id: attach.attachid,
                app_id: app.appid,
                file_ext: attach.fileext,
                md5: attach.filemd5,
            })
        }
        19 => AppContent::ChatHistory {
            title: app.title,
            record: decode_record(&app.recorditem),
        },
        33 => AppContent::MiniProgram {
            title: app.title,
            source_display_name: app.sourcedisplayname,
        },
        51 => {
            let feed = app.finder_feed.unwrap_or_default();
            AppContent::Channel {
                nickname: feed.nickname,
                desc: feed.desc,
            }
        }
        53 => AppContent::GroupNote { title: app.title },
        57 => AppContent::Quote {
            title: app.title,
            refer_svrid: app.refermsg.map(|r| num(&r.svrid)).unwrap_or_default(),
        },
        2000 => AppContent::Transfer {
            fee_desc: app.wcpayinfo.map(|p| p.feedesc).unwrap_or_default(),
        },
        other => AppContent::Other {
            app_type: other,
            title: app.title,
        },
    };
    Content::App(content)
}

/// `recorditem` carries a second XML document as escaped text.
fn decode_record(record_item: &str) -> Option<RecordInfo> {
    if record_item.trim().is_empty() {
        return None;
    }
    let info: RecordInfoXml = de(record_item)?;
    let datalist = info.datalist.unwrap_or_default();
    Some(RecordInfo {
        title: info.title,
        count: num(&datalist.count),
        items: datalist
            .dataitem
            .into_iter()
            .map(|i| RecordItem {
                source_name: i.sourcename,
                source_time: i.sourcetime,
                data_desc: i.datadesc,
            })
            .collect(),
    })
}

fn decode_sys(raw: &str) -> Content {
    let Some(sys) = de::<SysMsgXml>(raw) else {
        return Content::Unrecognized;
    };
    match sys.sys_type.as_str() {
        "revokemsg" => match sys.revokemsg {
            Some(r) => Content::Sys(SysContent::Revoke {
                new_msg_id: num(&r.newmsgid),
                replace_msg: r.replacemsg,
            }),
            None => Content::Sys(SysContent::Other(sys.sys_type)),
        },
        "pat" => match sys.pat {
            Some(p) => Content::Sys(SysContent::Pat {
                template: p.template,
            }),
            None => Content::Sys(SysContent::Other(sys.sys_type)),
        },
        _ => Content::Sys(SysContent::Other(sys.sys_type)),
    }
}

fn decode_voip(raw: &str) -> Content {
    let Some(voip) = de::<VoipMsgXml>(raw) else {
        return Content::Unrecognized;
    };
    if voip.voip_type == "VoIPBubbleMsg" {
        if let Some(bubble) = voip.bubble {
            return Content::Voip(bubble.msg);
        }
    }
    Content::Unrecognized
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_attributes_and_cdn_priority() {
        let xml = r#"<?xml version="1.0"?><msg><img aeskey="k" cdnmidimgurl="mid" cdnthumburl="thumb" length="4096" md5="abc"/></msg>"#;
        let Content::Image(img) = Content::decode(3, xml) else {
            panic!("expected image");
        };
        assert_eq!(img.aes_key, "k");
        assert_eq!(img.length, 4096);
        assert_eq!(img.best_cdn_url(), Some("mid"));
    }

    #[test]
    fn image_without_cdn_urls() {
        let xml = r#"<msg><img aeskey="k" length="1" md5="m"/></msg>"#;
        let Content::Image(img) = Content::decode(3, xml) else {
            panic!("expected image");
        };
        assert_eq!(img.best_cdn_url(), None);
    }

    #[test]
    fn voice_fields() {
        let xml = r#"<msg><voicemsg aeskey="vk" length="900" bufid="77" voicelength="3000"/></msg>"#;
        let Content::Voice(v) = Content::decode(34, xml) else {
            panic!("expected voice");
        };
        assert_eq!(v.buf_id, "77");
        assert_eq!(v.voice_length_ms, 3000);
    }

    #[test]
    fn link_with_articles() {
        let xml = r#"<msg><appmsg appid=""><title>Daily</title><des>d</des><type>5</type><url>https://e.com</url>
            <mmreader><category><item><title>A</title><url>https://a</url><summary>s1</summary></item>
            <item><title>B</title><url>https://b</url><digest>s2</digest></item></category></mmreader>
            </appmsg></msg>"#;
        let Content::App(AppContent::Link { title, articles, .. }) = Content::decode(49, xml)
        else {
            panic!("expected link");
        };
        assert_eq!(title, "Daily");
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[1].summary, "s2");
    }

    #[test]
    fn file_attachment() {
        let xml = r#"<msg><appmsg appid="wx123"><title>report.pdf</title><type>6</type>
            <appattach><totallen>2048</totallen><attachid>@att</attachid><fileext>pdf</fileext></appattach>
            </appmsg></msg>"#;
        let Content::App(AppContent::File(f)) = Content::decode(49, xml) else {
            panic!("expected file");
        };
        assert_eq!(f.app_id, "wx123");
        assert_eq!(f.total_len, 2048);
        assert_eq!(f.attach_id, "@att");
        assert_eq!(f.file_ext, "pdf");
    }

    #[test]
    fn quote_refer_svrid() {
        let xml = r#"<msg><appmsg><title>ok</title><type>57</type><refermsg><svrid>999</svrid></refermsg></appmsg></msg>"#;
        assert_eq!(
            Content::decode(49, xml),
            Content::App(AppContent::Quote {
                title: "ok".to_owned(),
                refer_svrid: 999
            })
        );
    }

    #[test]
    fn chat_history_nested_record() {
        let record = "&lt;recordinfo&gt;&lt;title&gt;群聊的聊天记录&lt;/title&gt;\
            &lt;datalist count=\"2\"&gt;\
            &lt;dataitem datatype=\"1\"&gt;&lt;sourcename&gt;Alice&lt;/sourcename&gt;&lt;sourcetime&gt;2023-10-01 10:00:00&lt;/sourcetime&gt;&lt;datadesc&gt;hi&lt;/datadesc&gt;&lt;/dataitem&gt;\
            &lt;dataitem datatype=\"1\"&gt;&lt;sourcename&gt;Bob&lt;/sourcename&gt;&lt;sourcetime&gt;2023-10-02 11:00:00&lt;/sourcetime&gt;&lt;datadesc&gt;yo&lt;/datadesc&gt;&lt;/dataitem&gt;\
            &lt;/datalist&gt;&lt;/recordinfo&gt;";
        let xml = format!(
            r#"<msg><appmsg><title>历史</title><type>19</type><recorditem>{record}</recorditem></appmsg></msg>"#
        );
        let Content::App(AppContent::ChatHistory { record, .. }) = Content::decode(49, &xml)
        else {
            panic!("expected chat history");
        };
        let record = record.expect("record decoded");
        assert_eq!(record.count, 2);
        assert_eq!(record.items[0].source_name, "Alice");
        assert_eq!(record.items[1].data_desc, "yo");
    }

    #[test]
    fn transfer_amount() {
        let xml = r#"<msg><appmsg><type>2000</type><wcpayinfo><feedesc>￥20.00</feedesc></wcpayinfo></appmsg></msg>"#;
        assert_eq!(
            Content::decode(49, xml),
            Content::App(AppContent::Transfer {
                fee_desc: "￥20.00".to_owned()
            })
        );
    }

    #[test]
    fn unknown_app_type_kept() {
        let xml = r#"<msg><appmsg><title>x</title><type>74</type></appmsg></msg>"#;
        let Content::App(AppContent::Other { app_type, .. }) = Content::decode(49, xml) else {
            panic!("expected other");
        };
        assert_eq!(app_type, 74);
    }

    #[test]
    fn revoke_sysmsg() {
        let xml = r#"<sysmsg type="revokemsg"><revokemsg><newmsgid>999</newmsgid><replacemsg>"X" 撤回了一条消息</replacemsg></revokemsg></sysmsg>"#;
        assert_eq!(
            Content::decode(10002, xml),
            Content::Sys(SysContent::Revoke {
                new_msg_id: 999,
                replace_msg: "\"X\" 撤回了一条消息".to_owned()
            })
        );
    }

    #[test]
    fn pat_sysmsg() {
        let xml = r#"<sysmsg type="pat"><pat><template>"${a}" 拍了拍 "${b}"</template></pat></sysmsg>"#;
        let Content::Sys(SysContent::Pat { template }) = Content::decode(10002, xml) else {
            panic!("expected pat");
        };
        assert!(template.contains("${a}"));
    }

    #[test]
    fn unknown_sys_type_kept_for_blacklist() {
        let xml = r#"<sysmsg type="bizlivenotify"><bizlivenotify/></sysmsg>"#;
        assert_eq!(
            Content::decode(10002, xml),
            Content::Sys(SysContent::Other("bizlivenotify".to_owned()))
        );
    }

    #[test]
    fn voip_bubble() {
        let xml = r#"<voipmsg type="VoIPBubbleMsg"><VoIPBubbleMsg><msg>通话时长 00:42</msg></VoIPBubbleMsg></voipmsg>"#;
        assert_eq!(
            Content::decode(50, xml),
            Content::Voip("通话时长 00:42".to_owned())
        );
    }

    #[test]
    fn location_coordinates() {
        let xml = r#"<msg><location x="31.23" y="121.47" label="上海市" poiname="外滩"/></msg>"#;
        let Content::Location(l) = Content::decode(48, xml) else {
            panic!("expected location");
        };
        assert!((l.x - 31.23).abs() < 1e-9);
        assert_eq!(l.poi_name, "外滩");
    }

    #[test]
    fn malformed_xml_is_unrecognized() {
        assert_eq!(Content::decode(49, "not xml at all"), Content::Unrecognized);
        assert_eq!(Content::decode(3, "<msg><img"), Content::Unrecognized);
    }

    #[test]
    fn roundtrip_fields_survive_for_quote_and_link() {
        // Every field the translator reads survives decode for
        // representative payloads.
        let quote = r#"<msg><appmsg><title>回复</title><type>57</type><refermsg><svrid>123456789</svrid></refermsg></appmsg></msg>"#;
        let Content::App(AppContent::Quote { refer_svrid, title }) = Content::decode(49, quote)
        else {
            panic!()
        };
        assert_eq!((refer_svrid, title.as_str()), (123_456_789, "回复"));

        let link = r#"<msg><appmsg><title>t</title><des>d</des><type>5</type><url>u</url></appmsg></msg>"#;
        let Content::App(AppContent::Link {
            title, url, des, ..
        }) = Content::decode(49, link)
        else {
            panic!()
        };
        assert_eq!(
            (title.as_str(), url.as_str(), des.as_str()),
            ("t", "u", "d")
        );
    }
}

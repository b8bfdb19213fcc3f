//! Snapshot of an iiod context: devices, their channels and the channel attributes
//! needed to compute a reading.

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;

/// Channel attributes that take part in computing a channel's value.
pub const VALUE_ATTRIBUTES: [&str; 4] = ["raw", "input", "offset", "scale"];

/// Everything fetched from a host in one refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorContext {
    pub devices: Vec<Device>,
}

/// An IIO device as seen in a context snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    /// IIO id, e.g. `iio:device0`
    pub id: String,
    /// Driver-provided name, e.g. `ina219`
    pub name: Option<String>,
    /// Channels in enumeration order
    pub channels: Vec<Channel>,
}

/// One IIO channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Channel {
    /// Channel id, e.g. `voltage0`; used as the field key
    pub id: String,
    pub name: Option<String>,
    /// Output channels are never read
    pub output: bool,
    /// Value-related attributes the channel declares, with their value once read
    pub attributes: BTreeMap<String, Option<String>>,
}

/// Source of channel readings for one device.
pub trait ChannelSource {
    /// Channel ids in enumeration order.
    fn list_channels(&self) -> Vec<&str>;

    /// Current value of a channel, `None` if it has nothing readable.
    fn read_channel_value(&self, channel_id: &str) -> Option<f64>;
}

impl SensorContext {
    /// Find the first device whose name equals `name` or whose id equals `id`.
    pub fn find_device(&self, name: Option<&str>, id: Option<&str>) -> Option<&Device> {
        self.devices.iter().find(|d| {
            let by_name = matches!((name, d.name.as_deref()), (Some(want), Some(have)) if want == have);
            let by_id = id.is_some_and(|want| want == d.id);
            by_name || by_id
        })
    }

    /// Parse the XML document returned by the iiod `PRINT` command.
    ///
    /// Only input channels and their value attributes are kept. Attribute values
    /// inlined by older iiod versions are picked up; the rest stay `None` until read.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut devices = Vec::new();
        let mut device: Option<Device> = None;
        let mut channel: Option<Channel> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| Error::protocol_error(format!("invalid context XML: {}", e)))?;

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let empty = matches!(event, Event::Empty(_));
                    match e.name().as_ref() {
                        b"device" => {
                            let d = Device {
                                id: required_attr(e, "id")?,
                                name: optional_attr(e, "name")?,
                                channels: Vec::new(),
                            };
                            if empty {
                                devices.push(d);
                            } else {
                                device = Some(d);
                            }
                        }
                        b"channel" if device.is_some() => {
                            let c = Channel {
                                id: required_attr(e, "id")?,
                                name: optional_attr(e, "name")?,
                                output: optional_attr(e, "type")?.as_deref() == Some("output"),
                                attributes: BTreeMap::new(),
                            };
                            match (empty, device.as_mut()) {
                                (true, Some(d)) => d.channels.push(c),
                                _ => channel = Some(c),
                            }
                        }
                        b"attribute" => {
                            if let Some(c) = channel.as_mut() {
                                let name = required_attr(e, "name")?;
                                if VALUE_ATTRIBUTES.contains(&name.as_str()) {
                                    c.attributes.insert(name, optional_attr(e, "value")?);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(ref e) => match e.name().as_ref() {
                    b"channel" => {
                        if let (Some(c), Some(d)) = (channel.take(), device.as_mut()) {
                            d.channels.push(c);
                        }
                    }
                    b"device" => {
                        if let Some(d) = device.take() {
                            devices.push(d);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        for d in &mut devices {
            d.channels.retain(|c| !c.output);
        }

        Ok(Self { devices })
    }
}

impl Device {
    /// Look up a channel by id.
    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }
}

impl ChannelSource for Device {
    fn list_channels(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.id.as_str()).collect()
    }

    fn read_channel_value(&self, channel_id: &str) -> Option<f64> {
        self.channel(channel_id).and_then(Channel::value)
    }
}

impl Channel {
    /// Parsed value of a value attribute, if the channel has it and it was read.
    pub fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes
            .get(name)?
            .as_deref()?
            .trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .parse()
            .ok()
    }

    /// Compute the channel's reading.
    ///
    /// A processed `input` value wins. Otherwise the value is `(raw + offset) * scale`,
    /// with offset defaulting to 0 and scale to 1.
    pub fn value(&self) -> Option<f64> {
        if let Some(input) = self.attribute("input") {
            return Some(input);
        }

        let raw = self.attribute("raw")?;
        let offset = self.attribute("offset").unwrap_or(0.0);
        let scale = self.attribute("scale").unwrap_or(1.0);
        Some((raw + offset) * scale)
    }

    /// Names of declared value attributes that have not been read yet.
    pub fn unread_attributes(&self) -> Vec<String> {
        self.attributes
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.clone())
            .collect()
    }
}

fn optional_attr(e: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::protocol_error(format!("invalid XML attribute: {}", err)))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| Error::protocol_error(format!("invalid XML attribute value: {}", err)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required_attr(e: &BytesStart<'_>, key: &str) -> Result<String> {
    optional_attr(e, key)?.ok_or_else(|| {
        Error::protocol_error(format!(
            "<{}> element without '{}' attribute",
            String::from_utf8_lossy(e.name().as_ref()),
            key
        ))
    })
}

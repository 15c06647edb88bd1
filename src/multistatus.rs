//! `207 Multi-Status` response bodies.
use bytes::Bytes;
use xml::common::XmlVersion;
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};

use crate::condition::ConditionCode;
use crate::util::MemBuffer;
use crate::xmldom::{emitter, Element, NS_DAV_URI};
use crate::DavResult;

/// Properties that share one status in a `DAV:propstat`.
#[derive(Debug, Clone)]
pub(crate) struct PropStat {
    pub status: ConditionCode,
    pub props: Vec<Element>,
}

impl PropStat {
    pub fn new(status: ConditionCode) -> PropStat {
        PropStat {
            status,
            props: Vec::new(),
        }
    }
}

/// Writes a `DAV:multistatus` document one `DAV:response` at a time.
pub(crate) struct MultiStatus {
    xw: EventWriter<MemBuffer>,
}

impl MultiStatus {
    pub fn new() -> DavResult<MultiStatus> {
        let mut xw = emitter();
        xw.write(XmlWEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })?;
        xw.write(XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV_URI))?;
        Ok(MultiStatus { xw })
    }

    fn text(&mut self, name: &str, text: &str) -> DavResult<()> {
        self.xw.write(XmlWEvent::start_element(name))?;
        self.xw.write(XmlWEvent::characters(text))?;
        self.xw.write(XmlWEvent::end_element())?;
        Ok(())
    }

    // status, error and responsedescription of a response or propstat.
    fn status(&mut self, status: &ConditionCode) -> DavResult<()> {
        self.text("D:status", &status.status_line())?;
        if let Some(cond) = status.error_element() {
            self.xw.write(XmlWEvent::start_element("D:error"))?;
            cond.write_ev(&mut self.xw)?;
            self.xw.write(XmlWEvent::end_element())?;
        }
        if let Some(msg) = status.message() {
            self.text("D:responsedescription", msg)?;
        }
        Ok(())
    }

    /// A response with only a status for `href`.
    pub fn response_status(&mut self, href: &str, status: &ConditionCode) -> DavResult<()> {
        self.xw.write(XmlWEvent::start_element("D:response"))?;
        self.text("D:href", href)?;
        self.status(status)?;
        self.xw.write(XmlWEvent::end_element())?;
        Ok(())
    }

    /// A response with one propstat per entry of `propstats`.
    pub fn response_propstats(&mut self, href: &str, propstats: &[PropStat]) -> DavResult<()> {
        self.xw.write(XmlWEvent::start_element("D:response"))?;
        self.text("D:href", href)?;
        for ps in propstats {
            self.xw.write(XmlWEvent::start_element("D:propstat"))?;
            self.xw.write(XmlWEvent::start_element("D:prop"))?;
            for p in &ps.props {
                p.write_ev(&mut self.xw)?;
            }
            self.xw.write(XmlWEvent::end_element())?;
            self.status(&ps.status)?;
            self.xw.write(XmlWEvent::end_element())?;
        }
        self.xw.write(XmlWEvent::end_element())?;
        Ok(())
    }

    pub fn finish(mut self) -> DavResult<Bytes> {
        self.xw.write(XmlWEvent::end_element())?;
        Ok(self.xw.into_inner().take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmldom::QName;
    use http::StatusCode;

    #[test]
    fn propstat_layout() {
        let mut ms = MultiStatus::new().unwrap();
        let mut ok = PropStat::new(ConditionCode::ok());
        ok.props.push(Element::dav("resourcetype").with_child(Element::dav("collection")));
        let mut missing = PropStat::new(ConditionCode::not_found());
        missing.props.push(Element::new(QName::new("TEST:", "foo")));
        ms.response_propstats("/dir", &[ok, missing]).unwrap();
        let body = ms.finish().unwrap();
        let s = std::str::from_utf8(&body).unwrap();
        assert!(s.contains("<D:multistatus xmlns:D=\"DAV:\"><D:response><D:href>/dir</D:href>"));
        assert!(s.contains(
            "<D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop><D:status>HTTP/1.1 200 OK</D:status>"
        ));
        assert!(s.contains("<ns0:foo xmlns:ns0=\"TEST:\"/>"));
        assert!(s.contains("<D:status>HTTP/1.1 404 Not Found</D:status>"));
    }

    #[test]
    fn status_with_error() {
        let mut ms = MultiStatus::new().unwrap();
        let cond = ConditionCode::locked(&["/a".to_string()]);
        ms.response_status("/a/b", &cond).unwrap();
        ms.response_status("/c", &ConditionCode::with_message(StatusCode::FORBIDDEN, "no"))
            .unwrap();
        let body = ms.finish().unwrap();
        let s = std::str::from_utf8(&body).unwrap();
        assert!(s.contains(
            "<D:status>HTTP/1.1 423 Locked</D:status><D:error><D:lock-token-submitted><D:href>/a</D:href></D:lock-token-submitted></D:error>"
        ));
        assert!(s.contains("<D:responsedescription>no</D:responsedescription>"));
    }
}

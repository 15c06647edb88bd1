use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, Request, StatusCode};

use davcore::{
    DavHandler, DavLockStore, DavLockSystem, DavPath, LocationConfig, LockSystem, MemLockStore, MemLs,
    PropPatchAtomicity, PropPatchReport,
};

const TEST_NS: &str = r#"xmlns:D="DAV:" xmlns:T="TEST:" xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#;

fn handler() -> DavHandler {
    let _ = env_logger::builder().is_test(true).try_init();
    DavHandler::builder()
        .location(LocationConfig::new("/", "memfs"))
        .locksystem(LockSystem::Mem)
        .build()
        .unwrap()
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl Reply {
    fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .map(|v| v.to_str().unwrap())
            .unwrap_or("")
    }
}

async fn send(dav: &DavHandler, method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> Reply {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(body.to_string()).unwrap();
    let (parts, body) = dav.handle(req).await.into_parts();
    let chunks: Vec<Bytes> = body.map(|c| c.unwrap()).collect().await;
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8(chunks.concat()).unwrap(),
    }
}

async fn put(dav: &DavHandler, path: &str, body: &str) {
    let r = send(dav, "PUT", path, &[], body).await;
    assert_eq!(r.status, StatusCode::CREATED, "PUT {}", path);
}

fn proppatch_set(props: &str) -> String {
    format!(
        "<D:propertyupdate {}><D:set><D:prop>{}</D:prop></D:set></D:propertyupdate>",
        TEST_NS, props
    )
}

fn propfind_prop(props: &str) -> String {
    format!("<D:propfind {}><D:prop>{}</D:prop></D:propfind>", TEST_NS, props)
}

const LOCKINFO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:exclusive/></D:lockscope><D:locktype><D:write/></D:locktype><D:owner>tester</D:owner></D:lockinfo>"#;

#[tokio::test]
async fn propfind_depth0_found_and_missing() {
    let dav = handler();
    assert_eq!(send(&dav, "MKCOL", "/dir", &[], "").await.status, StatusCode::CREATED);

    let body = propfind_prop("<D:resourcetype/><T:foo/>");
    let r = send(&dav, "PROPFIND", "/dir", &[("Depth", "0")], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("<D:href>/dir/</D:href>"), "{}", r.body);
    assert!(r.body.contains("<D:collection/>"), "{}", r.body);

    let ok = r.body.find("HTTP/1.1 200 OK").unwrap();
    let foo = r.body.find("TEST:").unwrap();
    let missing = r.body.find("HTTP/1.1 404 Not Found").unwrap();
    assert!(ok < foo && foo < missing, "{}", r.body);
}

#[tokio::test]
async fn propfind_depth1_lists_members() {
    let dav = handler();
    send(&dav, "MKCOL", "/dir", &[], "").await;
    put(&dav, "/dir/a.txt", "aaa").await;
    put(&dav, "/dir/b.txt", "bbbb").await;

    let body = propfind_prop("<D:getcontentlength/>");
    let r = send(&dav, "PROPFIND", "/dir/", &[("Depth", "1")], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("<D:href>/dir/a.txt</D:href>"), "{}", r.body);
    assert!(r.body.contains("<D:href>/dir/b.txt</D:href>"), "{}", r.body);
    assert!(r.body.contains("<D:getcontentlength>4</D:getcontentlength>"), "{}", r.body);
}

#[tokio::test]
async fn infinite_propfind_can_be_refused() {
    let dav = DavHandler::builder()
        .location(LocationConfig::new("/", "memfs").param("allowInfinitePropFind", "false"))
        .build()
        .unwrap();
    let r = send(&dav, "PROPFIND", "/", &[("Depth", "infinity")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    assert!(r.body.contains("propfind-finite-depth"), "{}", r.body);

    let r = send(&dav, "PROPFIND", "/", &[("Depth", "1")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn propfind_with_if_modified_since() {
    let dav = handler();
    put(&dav, "/file", "hello").await;
    let r = send(
        &dav,
        "PROPFIND",
        "/file",
        &[("Depth", "0"), ("If-Modified-Since", "Sun, 06 Nov 2044 08:49:37 GMT")],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn proppatch_is_all_or_nothing() {
    let dav = handler();
    put(&dav, "/file", "hello").await;

    let body = proppatch_set(r#"<T:good>x</T:good><T:flag xsi:type="xs:boolean">maybe</T:flag>"#);
    let r = send(&dav, "PROPPATCH", "/file", &[], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    let dependent = r.body.find("HTTP/1.1 424 Failed Dependency").unwrap();
    let invalid = r.body.find("HTTP/1.1 422 Unprocessable Entity").unwrap();
    assert!(dependent < invalid, "{}", r.body);

    let r = send(&dav, "PROPFIND", "/file", &[("Depth", "0")], &propfind_prop("<T:good/>")).await;
    assert!(r.body.contains("HTTP/1.1 404 Not Found"), "{}", r.body);
    assert!(!r.body.contains("HTTP/1.1 200 OK"), "{}", r.body);
}

#[tokio::test]
async fn typed_property_roundtrip() {
    let dav = handler();
    put(&dav, "/file", "hello").await;

    let body = proppatch_set(r#"<T:flag xsi:type="xs:boolean">true</T:flag>"#);
    let r = send(&dav, "PROPPATCH", "/file", &[], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("HTTP/1.1 200 OK"), "{}", r.body);

    let r = send(&dav, "PROPFIND", "/file", &[("Depth", "0")], &propfind_prop("<T:flag/>")).await;
    assert!(r.body.contains(">true</"), "{}", r.body);
    assert!(r.body.contains("xs:boolean"), "{}", r.body);
    assert!(r.body.contains("http://www.w3.org/2001/XMLSchema"), "{}", r.body);
}

#[tokio::test]
async fn live_properties_are_protected() {
    let dav = handler();
    put(&dav, "/file", "hello").await;
    let body = proppatch_set("<D:getetag>nope</D:getetag>");
    let r = send(&dav, "PROPPATCH", "/file", &[], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("HTTP/1.1 403 Forbidden"), "{}", r.body);
    assert!(r.body.contains("cannot-modify-protected-property"), "{}", r.body);
}

#[tokio::test]
async fn lock_blocks_writes_without_token() {
    let dav = handler();
    put(&dav, "/file", "hello").await;

    let r = send(&dav, "LOCK", "/file", &[("Timeout", "Second-600")], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.contains("<D:lockdiscovery>"), "{}", r.body);
    let token = r.header("Lock-Token").to_string();
    assert!(token.starts_with("<urn:uuid:"), "{}", token);

    let r = send(&dav, "PUT", "/file", &[], "other").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let r = send(&dav, "DELETE", "/file", &[], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let cond = format!("({})", token);
    let r = send(&dav, "PUT", "/file", &[("If", cond.as_str())], "other").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = send(&dav, "LOCK", "/file", &[], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let r = send(&dav, "UNLOCK", "/file", &[("Lock-Token", token.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&dav, "PUT", "/file", &[], "free").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn lock_refresh_and_unmapped_lock() {
    let dav = handler();
    let r = send(&dav, "LOCK", "/new", &[], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let token = r.header("Lock-Token").to_string();

    let r = send(&dav, "GET", "/new", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "");

    let cond = format!("({})", token);
    let r = send(&dav, "LOCK", "/new", &[("If", cond.as_str()), ("Timeout", "Second-100")], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.contains("Second-"), "{}", r.body);
    assert!(r.header("Lock-Token").is_empty());

    let r = send(&dav, "LOCK", "/new", &[("If", "(<urn:uuid:unknown>)")], "").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn unlock_with_foreign_token() {
    let dav = handler();
    put(&dav, "/a", "a").await;
    put(&dav, "/b", "b").await;
    let r = send(&dav, "LOCK", "/a", &[], LOCKINFO).await;
    let token = r.header("Lock-Token").to_string();

    let r = send(&dav, "UNLOCK", "/b", &[("Lock-Token", token.as_str())], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);
    assert!(r.body.contains("lock-token-matches-request-uri"), "{}", r.body);

    let r = send(&dav, "UNLOCK", "/a", &[("Lock-Token", "garbage")], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_ranges() {
    let dav = handler();
    put(&dav, "/file", "0123456789").await;

    let r = send(&dav, "GET", "/file", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "0123456789");
    assert_eq!(r.header("Accept-Ranges"), "bytes");
    let etag = r.header("ETag").to_string();
    assert!(!etag.is_empty());

    let r = send(&dav, "GET", "/file", &[("Range", "bytes=2-4")], "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.body, "234");
    assert_eq!(r.header("Content-Range"), "bytes 2-4/10");

    let r = send(&dav, "GET", "/file", &[("Range", "bytes=-3")], "").await;
    assert_eq!(r.body, "789");

    let r = send(&dav, "GET", "/file", &[("Range", "bytes=0-1,5-6")], "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert!(r.header("Content-Type").starts_with("multipart/byteranges; boundary="));
    assert!(r.body.contains("Content-Range: bytes 0-1/10"), "{}", r.body);
    assert!(r.body.contains("Content-Range: bytes 5-6/10"), "{}", r.body);

    let r = send(&dav, "GET", "/file", &[("Range", "bytes=20-30")], "").await;
    assert_eq!(r.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(r.header("Content-Range"), "bytes */10");

    // a stale If-Range means the whole entity.
    let r = send(&dav, "GET", "/file", &[("Range", "bytes=2-4"), ("If-Range", "\"stale\"")], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "0123456789");

    let r = send(&dav, "GET", "/file", &[("If-None-Match", etag.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NOT_MODIFIED);
    assert_eq!(r.body, "");
}

#[tokio::test]
async fn copy_and_move() {
    let dav = handler();
    send(&dav, "MKCOL", "/src", &[], "").await;
    put(&dav, "/src/f", "data").await;
    put(&dav, "/other", "x").await;

    let r = send(&dav, "COPY", "/src/", &[("Destination", "http://localhost/dst/"), ("Host", "localhost")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "GET", "/dst/f", &[], "").await;
    assert_eq!(r.body, "data");

    let r = send(
        &dav,
        "MOVE",
        "/src/f",
        &[("Destination", "/other"), ("Overwrite", "F")],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = send(&dav, "MOVE", "/src/f", &[("Destination", "/other")], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_eq!(send(&dav, "GET", "/other", &[], "").await.body, "data");
    assert_eq!(send(&dav, "GET", "/src/f", &[], "").await.status, StatusCode::NOT_FOUND);

    let r = send(&dav, "MOVE", "/dst/", &[("Destination", "/dst/inner/")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);

    let r = send(&dav, "COPY", "/other", &[("Destination", "http://elsewhere.example/x"), ("Host", "localhost:8080")], "").await;
    assert_eq!(r.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn dead_properties_follow_copy() {
    let dav = handler();
    put(&dav, "/a", "a").await;
    send(&dav, "PROPPATCH", "/a", &[], &proppatch_set("<T:color>red</T:color>")).await;

    let r = send(&dav, "COPY", "/a", &[("Destination", "/b")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "PROPFIND", "/b", &[("Depth", "0")], &propfind_prop("<T:color/>")).await;
    assert!(r.body.contains(">red</"), "{}", r.body);
}

#[tokio::test]
async fn delete_and_mkcol() {
    let dav = handler();
    assert_eq!(send(&dav, "MKCOL", "/a/b", &[], "").await.status, StatusCode::CONFLICT);
    assert_eq!(send(&dav, "MKCOL", "/a", &[], "").await.status, StatusCode::CREATED);
    assert_eq!(send(&dav, "MKCOL", "/a", &[], "").await.status, StatusCode::METHOD_NOT_ALLOWED);
    put(&dav, "/a/f", "f").await;

    let r = send(&dav, "DELETE", "/a", &[("Depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = send(&dav, "DELETE", "/a", &[], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_eq!(send(&dav, "GET", "/a/f", &[], "").await.status, StatusCode::NOT_FOUND);
    assert_eq!(send(&dav, "DELETE", "/", &[], "").await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn options_headers() {
    let dav = handler();
    put(&dav, "/file", "x").await;

    let r = send(&dav, "OPTIONS", "/file", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("DAV"), "1, 2");
    assert_eq!(r.header("MS-Author-Via"), "DAV");
    let allow = r.header("Allow");
    assert!(allow.contains("PROPFIND") && allow.contains("LOCK"), "{}", allow);
    assert!(!allow.contains("MKCOL"), "{}", allow);

    let r = send(&dav, "OPTIONS", "/missing", &[], "").await;
    let allow = r.header("Allow");
    assert!(allow.contains("MKCOL") && allow.contains("PUT"), "{}", allow);
    assert!(!allow.contains("PROPFIND"), "{}", allow);

    let plain = DavHandler::builder()
        .location(LocationConfig::new("/", "memfs"))
        .build()
        .unwrap();
    let r = send(&plain, "OPTIONS", "/", &[], "").await;
    assert_eq!(r.header("DAV"), "1");
    assert!(!r.header("Allow").contains("LOCK"));
}

#[tokio::test]
async fn locations_route_by_prefix() {
    let dav = DavHandler::builder()
        .location(LocationConfig::new("/dav", "memfs"))
        .location(LocationConfig::new("/off", "memfs").enabled(false))
        .build()
        .unwrap();
    let r = send(&dav, "PUT", "/dav/file", &[], "x").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "PROPFIND", "/dav/file", &[("Depth", "0")], "").await;
    assert!(r.body.contains("<D:href>/dav/file</D:href>"), "{}", r.body);

    assert_eq!(send(&dav, "GET", "/elsewhere", &[], "").await.status, StatusCode::NOT_FOUND);
    assert_eq!(send(&dav, "PUT", "/off/file", &[], "x").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_service_is_a_config_error() {
    let res = DavHandler::builder()
        .location(LocationConfig::new("/", "nosuchservice"))
        .build();
    assert!(res.is_err());
}

#[tokio::test]
async fn sweeper_removes_expired_locks() {
    let store = Arc::new(MemLockStore::new());
    let ls = MemLs::with_store(store.clone()).unwrap();
    let _sweeper = ls.spawn_sweeper(Duration::from_millis(50));

    let path = DavPath::new("/file");
    ls.lock(&path, None, None, Some(Duration::from_secs(1)), false, false)
        .unwrap();
    ls.lock(&DavPath::new("/keep"), None, None, None, false, false)
        .unwrap();
    assert_eq!(store.load().unwrap().len(), 2);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let saved = store.load().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].path.as_str(), "/keep");
    assert!(ls.discover(&path, true, true).is_empty());
}

fn proppatch(instructions: &str) -> String {
    format!("<D:propertyupdate {}>{}</D:propertyupdate>", TEST_NS, instructions)
}

#[tokio::test]
async fn proppatch_block_atomicity_with_merged_report() {
    let dav = DavHandler::builder()
        .location(LocationConfig::new("/", "memfs"))
        .proppatch_atomicity(PropPatchAtomicity::Block)
        .proppatch_report(PropPatchReport::Merged)
        .build()
        .unwrap();
    put(&dav, "/file", "hello").await;

    let body = proppatch(
        r#"<D:set><D:prop><T:a>1</T:a></D:prop></D:set><D:set><D:prop><T:a>2</T:a><T:bad xsi:type="xs:int">x</T:bad></D:prop></D:set>"#,
    );
    let r = send(&dav, "PROPPATCH", "/file", &[], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    // the first block is applied, but T:a is reported with its worst status.
    assert!(!r.body.contains("HTTP/1.1 200 OK"), "{}", r.body);
    assert!(r.body.contains("HTTP/1.1 424 Failed Dependency"), "{}", r.body);
    assert!(r.body.contains("HTTP/1.1 422 Unprocessable Entity"), "{}", r.body);
    assert_eq!(r.body.matches("<T:a").count(), 1, "{}", r.body);

    let r = send(&dav, "PROPFIND", "/file", &[("Depth", "0")], &propfind_prop("<T:a/><T:bad/>")).await;
    assert!(r.body.contains(">1</T:a>"), "{}", r.body);
    assert!(r.body.contains("HTTP/1.1 404 Not Found"), "{}", r.body);
}

#[tokio::test]
async fn proppatch_reports_each_instruction() {
    let dav = DavHandler::builder()
        .location(LocationConfig::new("/", "memfs"))
        .proppatch_atomicity(PropPatchAtomicity::Block)
        .build()
        .unwrap();
    put(&dav, "/file", "hello").await;

    let body = proppatch(
        r#"<D:set><D:prop><T:a>1</T:a></D:prop></D:set><D:set><D:prop><T:a>2</T:a><T:bad xsi:type="xs:int">x</T:bad></D:prop></D:set>"#,
    );
    let r = send(&dav, "PROPPATCH", "/file", &[], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    let ok = r.body.find("HTTP/1.1 200 OK").unwrap();
    let dependent = r.body.find("HTTP/1.1 424 Failed Dependency").unwrap();
    assert!(ok < dependent, "{}", r.body);
    // T:a shows up in the 200 group and in the 424 group.
    assert_eq!(r.body.matches("<T:a").count(), 2, "{}", r.body);
    assert_eq!(r.body.matches("<D:propstat>").count(), 3, "{}", r.body);
}

#[tokio::test]
async fn proppatch_applies_in_document_order() {
    let dav = handler();
    put(&dav, "/file", "hello").await;

    let body = proppatch(
        "<D:set><D:prop><T:a>1</T:a></D:prop></D:set><D:remove><D:prop><T:a/></D:prop></D:remove><D:set><D:prop><T:a>3</T:a></D:prop></D:set>",
    );
    let r = send(&dav, "PROPPATCH", "/file", &[], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(r.body.matches("<D:propstat>").count(), 1, "{}", r.body);
    assert_eq!(r.body.matches("<T:a").count(), 1, "{}", r.body);
    let r = send(&dav, "PROPFIND", "/file", &[("Depth", "0")], &propfind_prop("<T:a/>")).await;
    assert!(r.body.contains(">3</T:a>"), "{}", r.body);

    let body = proppatch(
        "<D:set><D:prop><T:a>4</T:a></D:prop></D:set><D:remove><D:prop><T:a/></D:prop></D:remove>",
    );
    send(&dav, "PROPPATCH", "/file", &[], &body).await;
    let r = send(&dav, "PROPFIND", "/file", &[("Depth", "0")], &propfind_prop("<T:a/>")).await;
    assert!(r.body.contains("HTTP/1.1 404 Not Found"), "{}", r.body);
}

#[tokio::test]
async fn dead_properties_inherit_xml_lang() {
    let dav = handler();
    put(&dav, "/file", "hello").await;

    let body = format!(
        r#"<D:propertyupdate {} xml:lang="fr"><D:set><D:prop><T:title>bonjour</T:title><T:other xml:lang="de">hallo</T:other></D:prop></D:set><D:set xml:lang="en"><D:prop><T:third>hi</T:third></D:prop></D:set></D:propertyupdate>"#,
        TEST_NS
    );
    let r = send(&dav, "PROPPATCH", "/file", &[], &body).await;
    assert!(r.body.contains("HTTP/1.1 200 OK"), "{}", r.body);

    let r = send(
        &dav,
        "PROPFIND",
        "/file",
        &[("Depth", "0")],
        &propfind_prop("<T:title/><T:other/><T:third/>"),
    )
    .await;
    assert!(r.body.contains(r#"xml:lang="fr">bonjour<"#), "{}", r.body);
    assert!(r.body.contains(r#"xml:lang="de">hallo<"#), "{}", r.body);
    assert!(r.body.contains(r#"xml:lang="en">hi<"#), "{}", r.body);
}

#[tokio::test]
async fn complex_values_get_fresh_prefixes() {
    let dav = handler();
    put(&dav, "/file", "hello").await;

    // "D" is bound to another namespace inside the value.
    let body = proppatch_set(
        r#"<T:complex xmlns:D="urn:other"><D:child xsi:type="D:mine" D:attr="v">x</D:child></T:complex>"#,
    );
    let r = send(&dav, "PROPPATCH", "/file", &[], &body).await;
    assert!(r.body.contains("HTTP/1.1 200 OK"), "{}", r.body);

    let r = send(&dav, "PROPFIND", "/file", &[("Depth", "0")], &propfind_prop("<T:complex/>")).await;
    assert!(r.body.contains(r#"xmlns:ns0="urn:other""#), "{}", r.body);
    assert!(r.body.contains("<ns0:child"), "{}", r.body);
    assert!(r.body.contains(r#"ns0:attr="v""#), "{}", r.body);
    assert!(r.body.contains(r#"xsi:type="ns0:mine""#), "{}", r.body);
    assert!(!r.body.contains("<D:child"), "{}", r.body);
}

#[tokio::test]
async fn conditional_put_and_delete() {
    let dav = handler();
    put(&dav, "/file", "hello").await;
    let etag = send(&dav, "GET", "/file", &[], "").await.header("ETag").to_string();

    let r = send(&dav, "PUT", "/file", &[("If-Match", "\"nope\"")], "other").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
    let r = send(&dav, "PUT", "/file", &[("If-Match", etag.as_str())], "other").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = send(&dav, "PUT", "/missing", &[("If-Match", "*")], "x").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
    let r = send(&dav, "PUT", "/file", &[("If-None-Match", "*")], "x").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let past = "Sun, 06 Nov 1994 08:49:37 GMT";
    let r = send(&dav, "DELETE", "/file", &[("If-Unmodified-Since", past)], "").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
    let r = send(&dav, "PUT", "/file", &[("If-Unmodified-Since", past)], "x").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(send(&dav, "GET", "/file", &[], "").await.body, "other");

    let r = send(&dav, "DELETE", "/file", &[("If-Match", "*")], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn hrefs_are_percent_encoded() {
    let dav = handler();
    put(&dav, "/a%20b", "x").await;
    put(&dav, "/%C3%A9t%C3%A9", "y").await;

    let r = send(&dav, "PROPFIND", "/", &[("Depth", "1")], &propfind_prop("<D:getcontentlength/>")).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("<D:href>/a%20b</D:href>"), "{}", r.body);
    assert!(r.body.contains("<D:href>/%C3%A9t%C3%A9</D:href>"), "{}", r.body);
}

#[tokio::test]
async fn move_or_copy_onto_ancestor_is_refused() {
    let dav = handler();
    send(&dav, "MKCOL", "/a", &[], "").await;
    put(&dav, "/a/b", "precious").await;

    let r = send(&dav, "MOVE", "/a/b", &[("Destination", "/a")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    let r = send(&dav, "COPY", "/a/b", &[("Destination", "/a/"), ("Overwrite", "T")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    let r = send(&dav, "MOVE", "/a/b", &[("Destination", "/")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);

    let r = send(&dav, "GET", "/a/b", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "precious");
}

#[tokio::test]
async fn lock_on_unmapped_member_needs_parent_token() {
    let dav = handler();
    send(&dav, "MKCOL", "/dir", &[], "").await;
    let r = send(&dav, "LOCK", "/dir", &[("Depth", "0")], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = r.header("Lock-Token").to_string();

    let r = send(&dav, "LOCK", "/dir/other", &[], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::LOCKED);
    assert_eq!(send(&dav, "GET", "/dir/other", &[], "").await.status, StatusCode::NOT_FOUND);

    let cond = format!("({})", token);
    let r = send(&dav, "LOCK", "/dir/other", &[("If", cond.as_str())], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::CREATED);
}

#[tokio::test]
async fn unlock_at_unmapped_url() {
    let ls = MemLs::new();
    let dav = DavHandler::builder()
        .location(LocationConfig::new("/", "memfs"))
        .locksystem(LockSystem::Custom(ls.clone()))
        .build()
        .unwrap();
    let ghost = DavPath::new("/ghost");
    let lock = ls.lock(&ghost, None, None, None, false, false).unwrap();

    let header = format!("<{}>", lock.token);
    let r = send(&dav, "UNLOCK", "/ghost", &[("Lock-Token", header.as_str())], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert!(ls.discover(&ghost, false, false).is_empty());

    let r = send(&dav, "UNLOCK", "/ghost", &[("Lock-Token", header.as_str())], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn multipart_boundary_is_quoted() {
    let dav = handler();
    put(&dav, "/file", "0123456789").await;

    let r = send(&dav, "GET", "/file", &[("Range", "bytes=0-1,5-6")], "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    let ctype = r.header("Content-Type");
    let boundary = ctype
        .strip_prefix("multipart/byteranges; boundary=\"")
        .and_then(|b| b.strip_suffix('"'))
        .unwrap();
    assert!(!boundary.is_empty());
    assert_eq!(r.body.matches(&format!("\r\n--{}\r\n", boundary)).count(), 2, "{}", r.body);
    assert!(r.body.ends_with(&format!("\r\n--{}--\r\n", boundary)), "{}", r.body);
}

//! Fixed request shapes for every endpoint role the portal exposes.
//!
//! Field names, field order and flag values below are what the portal's own
//! pages submit; the portal rejects sessions built from anything else.

use url::Url;

use crate::client::RequestStep;
use crate::credentials::Credentials;
use crate::error::{RelayError, RelayResult, StepRole};

/// Production portal origin.
pub const KRI_ORIGIN: &str = "https://www.kri.go.kr";

const ENTRY_PATH: &str = "/kri2";
const CERTIFY_PATH: &str = "/kri/rp/crosscert/GetCertSign.jsp?txtAnotherLogin=N";
const EXEC_PATH: &str = "/kri/rp/login_exec.jsp";
const ACHIEVEMENTS_PATH: &str = "/kri/rp/rschachv/PG-RP-101-01jl.jsp?new=new2";
const PAPERS_PATH: &str = "/kri/rp/rschachv/PG-RP-108-01js.jsp";
const PROJECTS_PATH: &str = "/kri/rp/rschachv/PG-RP-110-01js.jsp";
const SEARCH_PATH: &str = "/kri/rp/rschachv/PG-RP-102-01js.jsp";

/// Cookie the achievement page expects once its help overlay was dismissed.
const HELP_COOKIE: &str = "potalHelpViewYn=Y";

const UA_BOOTSTRAP: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";
const UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";
const ACCEPT_DOCUMENT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const ACCEPT_LANGUAGE: &str = "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7";
const SEC_CH_UA: &str = "\"Chromium\";v=\"128\", \"Not;A=Brand\";v=\"24\", \"Google Chrome\";v=\"128\"";

/// Headers a Chrome iframe navigation sends within the portal.
const IFRAME_NAVIGATION: &[(&str, &str)] = &[
    ("Accept", ACCEPT_DOCUMENT),
    ("Accept-Language", ACCEPT_LANGUAGE),
    ("Connection", "keep-alive"),
    ("Sec-Fetch-Dest", "iframe"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "same-origin"),
    ("Sec-Fetch-User", "?1"),
    ("Upgrade-Insecure-Requests", "1"),
    ("User-Agent", UA),
    ("sec-ch-ua", SEC_CH_UA),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"macOS\""),
];

/// Headers the achievement page's sheet widget sends with its XHR calls.
const SHEET_XHR: &[(&str, &str)] = &[
    ("User-Agent", UA),
    ("Accept", "*/*"),
    ("Accept-Language", ACCEPT_LANGUAGE),
    ("Content-Type", "application/x-www-form-urlencoded; charset=UTF-8"),
    ("X-Requested-With", "XMLHttpRequest"),
    ("Connection", "keep-alive"),
];

/// Full column order of the papers sheet.
pub const PAPERS_COLUMNS: &str = "=|RSCHR_REG_NO|MNG_NO|PBLC_YM|LANG_PPR_NM|ORG_LANG_PPR_NM|DIFF_LANG_PPR_NM|KRF_REG_PBLC_YN|OVRS_EXCLNC_SCJNL_PBLC_YN|PBLC_NTN_CD|SCJNL_NM|PBLC_PLC_NM|ISSN_NO|PPR_LANG_DVS_CD|IMPCT_FCTR|SCJNL_DVS_CD|RSRCHACPS_STDY_SPHE_CD|SBJT_NO|TOTAL_ATHR_CNT|PBLC_VOL_NO|PBLC_BK_NO|STT_PAGE|END_PAGE|VRFC_DVS_CD|VRFC_DTTM|APPR_DVS_CD|APPR_DTTM|APPR_RTRN_CNCL_RSN_CNTN|BLNG_UNIV_NM|BLNG_UNIV_CD|APD01_FLD_NM|APD02_FLD_NM|APD03_FLD_NM|APD04_FLD_NM|APD05_FLD_NM|RSRCHACPS_STDY_SPHE_NM|IRB_NO|MOD_DTTM|VRFC_PE_ID|APPR_PE_ID|VRFC_PE_NM|SBJT_NM|ABST_CNTN|LOGIC_FILE_NM|PHYSIC_FILE_NM| |VRFC_PPR_ID|VRFC_SRC_DVS_CD|DATA_SRC_DVS_CD|SCI_DVS_CD|OVERLAP_CHK|DOI";

/// Full column order of the research projects sheet.
pub const PROJECTS_COLUMNS: &str = "=|RSCHR_REG_NO|MNG_NO|RSCH_CMCM_YM|RSCH_END_YM|RSRCCT_SPPT_DVS_CD|RSCH_SBJT_STDY_SPHE_CD|RSCH_SBJT_NM|RSRCCT_SPPT_AGC_NM|TOT_RSRCCT|SBJT_NO|MNY_YR_SBJT_YN|BIZ_NM|CPT_GOV_OFFIC_NM|APD01_FLD_NM|APD02_FLD_NM|APD03_FLD_NM|APD04_FLD_NM|APD05_FLD_NM|MOD_DTTM|APPR_DVS_CD|APPR_RTRN_CNCL_RSN_CNTN|APPR_DTTM|DATA_SRC_DVS_CD|VRFC_DVS_CD|VRFC_DTTM|VRFC_PE_ID|VRFC_PE_NM|BLNG_UNIV_CD";

/// Column order of the researcher search sheet.
pub const SEARCH_COLUMNS: &str = "=|RSCHR_REG_NO|KOR_NM|ENG_NM|BLNG_AGC_NM|BLNG_DEPT_NM|POSI_NM";

/// Localized body substrings the portal uses to report a broken login,
/// paired with the reason reported to callers.
pub const FAILURE_MARKERS: &[(&str, &str)] = &[
    ("로그인 시간이 초과되었습니다", "portal reported that the login timed out"),
    ("로그인에 실패", "portal reported a failed login"),
];

/// Reason for the first failure marker found in `body`, if any.
pub fn find_failure_marker(body: &str) -> Option<&'static str> {
    FAILURE_MARKERS
        .iter()
        .find(|(marker, _)| body.contains(marker))
        .map(|(_, reason)| *reason)
}

/// Fail with [`RelayError::LoginFailed`] when `body` carries a failure marker.
pub fn check_failure_marker(step: StepRole, body: &str) -> RelayResult<()> {
    match find_failure_marker(body) {
        Some(reason) => Err(RelayError::LoginFailed {
            step,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Absolute URLs for every endpoint role.
#[derive(Debug, Clone)]
pub struct PortalEndpoints {
    pub origin: Url,
    pub entry: Url,
    pub certify: Url,
    pub exec: Url,
    pub achievements: Url,
    pub papers: Url,
    pub projects: Url,
    pub search: Url,
    /// Cross-domain warm-up needed before querying the mobile sub-portal.
    pub mobile_warmup: Option<Url>,
}

impl PortalEndpoints {
    /// Endpoints of the production portal.
    pub fn kri() -> Self {
        // The origin constant is a valid absolute URL.
        Self::with_origin(KRI_ORIGIN).unwrap_or_else(|e| unreachable!("{e}"))
    }

    /// Same endpoint paths rooted at another origin (mirrors, test servers).
    pub fn with_origin(origin: &str) -> RelayResult<Self> {
        let origin = Url::parse(origin).map_err(|e| RelayError::InvalidUrl(format!("{origin}: {e}")))?;
        let join = |path: &str| {
            origin
                .join(path)
                .map_err(|e| RelayError::InvalidUrl(format!("{path}: {e}")))
        };
        Ok(Self {
            entry: join(ENTRY_PATH)?,
            certify: join(CERTIFY_PATH)?,
            exec: join(EXEC_PATH)?,
            achievements: join(ACHIEVEMENTS_PATH)?,
            papers: join(PAPERS_PATH)?,
            projects: join(PROJECTS_PATH)?,
            search: join(SEARCH_PATH)?,
            mobile_warmup: None,
            origin,
        })
    }

    /// Enable the cross-domain warm-up.
    pub fn with_mobile_warmup(mut self, url: Url) -> Self {
        self.mobile_warmup = Some(url);
        self
    }

    /// Override the researcher search endpoint.
    pub fn with_search(mut self, url: Url) -> Self {
        self.search = url;
        self
    }

    fn origin_header(&self) -> String {
        self.origin.origin().ascii_serialization()
    }

    /// `Set-Cookie` value injected before the achievement warm-up.
    pub fn help_cookie(&self) -> String {
        let host = self.origin.host_str().unwrap_or_default();
        format!("{HELP_COOKIE}; Domain={host}; Path=/")
    }

    /// Step 1: entry page load.
    pub fn bootstrap(&self) -> RequestStep {
        RequestStep::get(StepRole::Bootstrap, self.entry.clone()).headers(&[
            ("Host", self.origin.host_str().unwrap_or_default()),
            ("Connection", "keep-alive"),
            ("Cache-Control", "max-age=0"),
            ("User-Agent", UA_BOOTSTRAP),
            ("Accept", ACCEPT_DOCUMENT),
            ("Accept-Language", ACCEPT_LANGUAGE),
            ("Sec-Fetch-Site", "same-origin"),
            ("Sec-Fetch-Mode", "navigate"),
            ("Sec-Fetch-User", "?1"),
            ("Sec-Fetch-Dest", "document"),
            ("Referer", self.entry.as_str()),
        ])
    }

    /// Step 2: credential submission to the certification endpoint.
    pub fn certify(&self, credentials: &Credentials) -> RequestStep {
        let portal_url = format!("{}:443", self.origin_header());
        let fields = [
            ("id", credentials.id_b64()),
            ("pw", credentials.pw_b64()),
            ("loginCheck", "N"),
            ("sysid", "KRI"),
            ("urlRealPath", ""),
            ("txtAgcId", ""),
            ("skinColor", "sky_blue"),
            ("nexturl", ""),
            ("type", "10"),
            ("turl", ""),
            ("afterjs", ""),
            ("ntarget", ""),
            ("sUrl", ""),
            ("url", portal_url.as_str()),
            ("loginGbn", ""),
            ("txtGbn", ""),
            ("kriAthidSi", ""),
            ("krimsAthNo", ""),
            ("tmpMbrDvsCd", ""),
            ("uid", credentials.uid()),
            ("upw", credentials.upw()),
            ("mbr_dvs_Cd", "null"),
        ];
        let origin = self.origin_header();
        RequestStep::post_form(StepRole::Certify, self.certify.clone(), &fields)
            .headers(&[
                ("Accept", ACCEPT_DOCUMENT),
                ("Accept-Language", ACCEPT_LANGUAGE),
                ("Cache-Control", "max-age=0"),
                ("Connection", "keep-alive"),
                ("Origin", origin.as_str()),
                ("Referer", self.entry.as_str()),
                ("Sec-Fetch-Dest", "iframe"),
                ("Sec-Fetch-Mode", "navigate"),
                ("Sec-Fetch-Site", "same-origin"),
                ("Sec-Fetch-User", "?1"),
                ("Upgrade-Insecure-Requests", "1"),
                ("User-Agent", UA),
                ("sec-ch-ua", SEC_CH_UA),
                ("sec-ch-ua-mobile", "?0"),
                ("sec-ch-ua-platform", "\"macOS\""),
                ("Content-Type", "application/x-www-form-urlencoded"),
            ])
    }

    /// Step 3: login execution, echoing the encoded identity in the query.
    pub fn exec(&self, credentials: &Credentials) -> RequestStep {
        let mut url = self.exec.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("txtLoginId", credentials.id_b64())
            .append_pair("txtLogDvs", "1")
            .append_pair("txtUserPw", credentials.pw_b64())
            .append_pair("txtLoginDvs", "I")
            .append_pair("txtAnotherLogin", "N")
            .append_pair("txtAgree", "1");
        RequestStep::get(StepRole::Exec, url)
            .headers(IFRAME_NAVIGATION)
            .header("Referer", self.certify.as_str())
    }

    /// Step 4a: achievement listing page load.
    pub fn warm_up(&self) -> RequestStep {
        RequestStep::get(StepRole::WarmUp, self.achievements.clone())
            .headers(IFRAME_NAVIGATION)
            .header("Referer", self.entry.as_str())
    }

    /// Step 4b: achievement listing form post that materializes the sheet session.
    pub fn warm_up_post(&self) -> RequestStep {
        let origin = self.origin_header();
        RequestStep::post_form(StepRole::WarmUp, self.achievements.clone(), &[("new", "new2")])
            .headers(IFRAME_NAVIGATION)
            .header("Origin", origin)
            .header("Referer", self.achievements.as_str())
            .header("Content-Type", "application/x-www-form-urlencoded")
    }

    /// Optional step 4c: cross-domain warm-up for the mobile sub-portal.
    pub fn mobile_warm_up(&self) -> Option<RequestStep> {
        self.mobile_warmup.as_ref().map(|url| {
            RequestStep::get(StepRole::MobileWarmUp, url.clone())
                .headers(IFRAME_NAVIGATION)
                .header("Referer", self.entry.as_str())
        })
    }

    /// Sheet retrieval XHR against `url` with the given extra form fields.
    pub fn sheet(&self, url: &Url, column_spec: &str, fields: &[(&str, &str)]) -> RequestStep {
        let mut form: Vec<(&str, &str)> = vec![("requestOrder", column_spec), ("sheetAcation", "F")];
        form.extend_from_slice(fields);
        let origin = self.origin_header();
        RequestStep::post_form(StepRole::DataFetch, url.clone(), &form)
            .headers(SHEET_XHR)
            .header("Origin", origin)
            .header("Referer", self.achievements.as_str())
    }

    /// Papers sheet for one researcher registry number.
    pub fn papers(&self, researcher_no: &str, column_spec: &str) -> RequestStep {
        self.sheet(&self.papers, column_spec, &[("txtRschrRegNo", researcher_no)])
    }

    /// Research projects sheet for one researcher registry number.
    pub fn projects(&self, researcher_no: &str, column_spec: &str) -> RequestStep {
        self.sheet(&self.projects, column_spec, &[("txtRschrRegNo", researcher_no)])
    }

    /// Researcher search by name and (optionally) organization.
    pub fn search(&self, name: &str, organization: &str, column_spec: &str) -> RequestStep {
        self.sheet(
            &self.search,
            column_spec,
            &[("txtKorNm", name), ("txtBlngAgcNm", organization)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Method;

    fn creds() -> Credentials {
        Credentials::from_plain("researcher", "p@ss word")
    }

    fn header<'a>(step: &'a RequestStep, name: &str) -> Option<&'a str> {
        step.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_production_endpoints() {
        let e = PortalEndpoints::kri();
        assert_eq!(e.entry.as_str(), "https://www.kri.go.kr/kri2");
        assert_eq!(
            e.certify.as_str(),
            "https://www.kri.go.kr/kri/rp/crosscert/GetCertSign.jsp?txtAnotherLogin=N"
        );
        assert_eq!(
            e.achievements.as_str(),
            "https://www.kri.go.kr/kri/rp/rschachv/PG-RP-101-01jl.jsp?new=new2"
        );
        assert!(e.mobile_warmup.is_none());
    }

    #[test]
    fn test_certify_form_fields_in_order() {
        let step = PortalEndpoints::kri().certify(&creds());
        assert_eq!(step.method, Method::POST);
        let body = step.body.as_deref().unwrap();
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        let names: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            [
                "id", "pw", "loginCheck", "sysid", "urlRealPath", "txtAgcId", "skinColor",
                "nexturl", "type", "turl", "afterjs", "ntarget", "sUrl", "url", "loginGbn",
                "txtGbn", "kriAthidSi", "krimsAthNo", "tmpMbrDvsCd", "uid", "upw", "mbr_dvs_Cd",
            ]
        );
        assert_eq!(pairs[0].1, "cmVzZWFyY2hlcg==");
        assert_eq!(pairs[13].1, "https://www.kri.go.kr:443");
        assert_eq!(pairs[20].1, "p@ss word");
        assert_eq!(pairs[21].1, "null");
        assert!(body.contains("upw=p%40ss+word"));
        assert_eq!(header(&step, "origin"), Some("https://www.kri.go.kr"));
    }

    #[test]
    fn test_exec_query_echoes_encoded_identity() {
        let step = PortalEndpoints::kri().exec(&creds());
        let query: Vec<(String, String)> = step.url.query_pairs().into_owned().collect();
        assert_eq!(query[0], ("txtLoginId".into(), "cmVzZWFyY2hlcg==".into()));
        assert_eq!(query[2].0, "txtUserPw");
        assert_eq!(query[5], ("txtAgree".into(), "1".into()));
        assert_eq!(
            header(&step, "referer"),
            Some("https://www.kri.go.kr/kri/rp/crosscert/GetCertSign.jsp?txtAnotherLogin=N")
        );
    }

    #[test]
    fn test_sheet_form_shape() {
        let step = PortalEndpoints::kri().papers("12570694", "|A|B");
        assert_eq!(
            step.body.as_deref(),
            Some("requestOrder=%7CA%7CB&sheetAcation=F&txtRschrRegNo=12570694")
        );
        assert_eq!(header(&step, "x-requested-with"), Some("XMLHttpRequest"));
        assert_eq!(step.role, StepRole::DataFetch);
    }

    #[test]
    fn test_help_cookie_targets_portal_host() {
        assert_eq!(
            PortalEndpoints::kri().help_cookie(),
            "potalHelpViewYn=Y; Domain=www.kri.go.kr; Path=/"
        );
    }

    #[test]
    fn test_failure_markers() {
        assert!(find_failure_marker("<script>alert('로그인 시간이 초과되었습니다.')</script>").is_some());
        assert!(find_failure_marker("로그인에 실패하였습니다").is_some());
        assert!(find_failure_marker("<html>welcome</html>").is_none());

        let err = check_failure_marker(StepRole::Certify, "로그인에 실패").unwrap_err();
        assert_eq!(err.step(), Some(StepRole::Certify));
        assert_eq!(err.kind(), "login_failed");
    }

    #[test]
    fn test_with_origin_rejects_garbage() {
        assert!(PortalEndpoints::with_origin("not a url").is_err());
    }
}

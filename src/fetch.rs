use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use url::Url;

use crate::config::SiteConfig;
use crate::error::{Error, Result};

/// Retrieves the markup of one listing page.
pub trait Fetcher {
    fn fetch(&self, url: &Url) -> Result<String>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(site: &SiteConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(site.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|err| Error::Configuration(format!("build http client: {err}")))?;

        Ok(Self {
            client,
            user_agent: site.user_agent.clone(),
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<String> {
        let network = |message: String| Error::Network {
            url: url.to_string(),
            message,
        };

        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "zh-TW,zh;q=0.9,en;q=0.5")
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    network(format!("timed out: {err}"))
                } else {
                    network(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(network(format!("http status {status}")));
        }

        let bytes = response
            .bytes()
            .map_err(|err| network(format!("read body: {err}")))?;

        // The catalog serves UTF-8 but does not always declare a charset.
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

//! Fixed file templates for the target Vite + React + TypeScript layout.

use serde_json::json;

/// Import alias shared by the bundler and the type-checker configs.
pub struct SourceAlias {
    pub key: &'static str,
    pub dir: &'static str,
}

pub const SOURCE_ALIAS: SourceAlias = SourceAlias { key: "@", dir: "src" };

pub const TAILWIND_CONFIG: &str = r#"/** @type {import('tailwindcss').Config} */
export default {
  content: [
    "./index.html",
    "./src/**/*.{js,ts,jsx,tsx}",
  ],
  theme: {
    extend: {
      colors: {
        primary: '#3B82F6',
        secondary: '#1E40AF',
        light: '#6B7280',
        dark: '#1F2937',
      },
      container: {
        center: true,
        padding: '1rem',
        screens: {
          sm: '640px',
          md: '768px',
          lg: '1024px',
          xl: '1280px',
        },
      },
    },
  },
  plugins: [],
}
"#;

pub const POSTCSS_CONFIG: &str = r#"export default {
  plugins: {
    tailwindcss: {},
    autoprefixer: {},
  },
}
"#;

pub const INDEX_CSS_TAILWIND: &str = r#"@tailwind base;
@tailwind components;
@tailwind utilities;

@layer base {
  body {
    @apply font-sans;
  }
}

@layer components {
  .container {
    @apply max-w-7xl mx-auto px-4 sm:px-6 lg:px-8;
  }

  .btn {
    @apply px-6 py-3 rounded-lg font-medium text-center transition-all duration-300 focus:outline-none focus:ring-2 focus:ring-offset-2;
  }

  .btn:not(.btn-secondary) {
    @apply bg-primary text-white hover:bg-blue-600 focus:ring-primary;
  }

  .btn-secondary {
    @apply bg-transparent text-primary border-2 border-primary hover:bg-primary hover:text-white focus:ring-primary;
  }
}

@layer utilities {
  .text-light {
    @apply text-gray-600;
  }
}
"#;

pub const INDEX_CSS_PLAIN: &str = r#":root {
  font-family: Inter, system-ui, Avenir, Helvetica, Arial, sans-serif;
  line-height: 1.5;
  font-weight: 400;
}

body {
  margin: 0;
  min-width: 320px;
  min-height: 100vh;
}
"#;

pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Generated App</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.tsx"></script>
  </body>
</html>
"#;

pub const MAIN_TSX: &str = r#"import React from 'react'
import ReactDOM from 'react-dom/client'
import App from './App'
import './index.css'

ReactDOM.createRoot(document.getElementById('root')!).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
)
"#;

pub fn vite_config() -> String {
    format!(
        r#"import {{ defineConfig }} from 'vite'
import react from '@vitejs/plugin-react'
import path from 'path'

export default defineConfig({{
  plugins: [react()],
  resolve: {{
    alias: {{
      '{key}': path.resolve(__dirname, './{dir}'),
    }},
  }},
  server: {{
    port: 3000,
    host: true,
  }},
  build: {{
    outDir: 'dist',
    sourcemap: false,
  }},
}})
"#,
        key = SOURCE_ALIAS.key,
        dir = SOURCE_ALIAS.dir,
    )
}

pub fn tsconfig() -> serde_json::Value {
    let alias_key = format!("{}/*", SOURCE_ALIAS.key);
    let alias_target = format!("./{}/*", SOURCE_ALIAS.dir);
    json!({
        "compilerOptions": {
            "target": "ES2020",
            "useDefineForClassFields": true,
            "lib": ["ES2020", "DOM", "DOM.Iterable"],
            "module": "ESNext",
            "skipLibCheck": true,
            "moduleResolution": "bundler",
            "allowImportingTsExtensions": true,
            "resolveJsonModule": true,
            "isolatedModules": true,
            "noEmit": true,
            "jsx": "react-jsx",
            "strict": true,
            "noUnusedLocals": true,
            "noUnusedParameters": true,
            "noFallthroughCasesInSwitch": true,
            "paths": { alias_key: [alias_target] }
        },
        "include": [SOURCE_ALIAS.dir],
        "references": []
    })
}

pub fn tsconfig_text() -> String {
    // Serializing a json! literal cannot fail
    let mut text = serde_json::to_string_pretty(&tsconfig()).unwrap_or_default();
    text.push('\n');
    text
}
